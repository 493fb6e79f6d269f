// OpenAPI adapter
//
// Same wire mechanics as the HTTP adapter, but parameter placement is
// driven by a mapping derived from an OpenAPI operation rather than by
// per-parameter declarations, and upstream failures carry the OpenAPI
// error shape.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::warn;

use super::http::{
	append_query, build_body, build_headers, headers_to_json, render_url, HttpConn,
};
use super::{
	check_required, decode_inputs, read_body_capped, resolve_param_values, CacheConfig,
	ToolExecutor,
};
use crate::auth::Authenticator;
use crate::config;
use crate::errors::GatewayError;
use crate::pipeline::{CallContext, ExecutionRequest};
use crate::pool::{Pool, PoolManager};
use crate::registry::{ParamLocation, ParamMapping, ToolDef};
use crate::secret::SecretResolver;
use crate::security;
use crate::template::{OutputTransformer, Template};

/// One parameter of a derived OpenAPI operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenApiParam {
	pub name: String,
	/// `path`, `query`, `header` or `body`, from the operation descriptor.
	#[serde(rename = "in")]
	pub location: ParamLocation,
	#[serde(default)]
	pub required: bool,
}

/// The path/query/body mapping derived from one OpenAPI operation.
/// Deriving it from the document is the registrar's job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenApiOperation {
	pub method: String,
	/// Server base, e.g. `https://api.example.com/v2`.
	pub base_url: String,
	/// Path template in `{{name}}` form.
	pub path: String,
	#[serde(default)]
	pub parameters: Vec<OpenApiParam>,
}

pub struct OpenApiTool {
	def: ToolDef,
	method: http::Method,
	url_template: Template,
	output: OutputTransformer,
	pools: Arc<PoolManager>,
	authenticator: Arc<dyn Authenticator>,
	secrets: Arc<dyn SecretResolver>,
	cache: Option<CacheConfig>,
}

impl OpenApiTool {
	/// Build a tool from a derived operation. The operation's parameters
	/// are folded into the descriptor so the shared HTTP construction
	/// helpers see one uniform mapping list.
	pub fn new(
		mut def: ToolDef,
		operation: &OpenApiOperation,
		pools: Arc<PoolManager>,
		authenticator: Arc<dyn Authenticator>,
		secrets: Arc<dyn SecretResolver>,
	) -> Result<Self, GatewayError> {
		let method = operation
			.method
			.to_ascii_uppercase()
			.parse::<http::Method>()
			.map_err(|_| GatewayError::InvalidHttpDefinition)?;
		let url = format!(
			"{}{}",
			operation.base_url.trim_end_matches('/'),
			operation.path
		);
		let url_template =
			Template::parse(&url).map_err(|_| GatewayError::InvalidHttpDefinition)?;

		for param in &operation.parameters {
			if def.parameter(&param.name).is_some() {
				continue;
			}
			let mut mapping = ParamMapping::new(&param.name, param.location);
			mapping.schema.required = param.required;
			def.parameters.push(mapping);
		}
		def.method_fqn = format!("{} {}", method, url);

		let output = def
			.output
			.as_ref()
			.map(OutputTransformer::compile)
			.transpose()?
			.unwrap_or_default();
		Ok(Self {
			def,
			method,
			url_template,
			output,
			pools,
			authenticator,
			secrets,
			cache: None,
		})
	}

	pub fn with_cache_config(mut self, cache: CacheConfig) -> Self {
		self.cache = Some(cache);
		self
	}
}

#[async_trait]
impl ToolExecutor for OpenApiTool {
	fn tool(&self) -> &ToolDef {
		&self.def
	}

	async fn execute(
		&self,
		ctx: &CallContext,
		req: &ExecutionRequest,
	) -> Result<Value, GatewayError> {
		let pool: Arc<dyn Pool<HttpConn>> = self
			.pools
			.get_by_type::<HttpConn>(&self.def.service_id)
			.ok_or_else(|| GatewayError::pool_not_found("http", &self.def.service_id))?;

		let inputs = decode_inputs(req)?;
		check_required(&self.def, &inputs)?;
		let resolved: HashMap<String, String> =
			resolve_param_values(&self.def, &inputs, self.secrets.as_ref()).await?;

		let rendered = render_url(&self.def, &self.url_template, &resolved)?;
		let mut url =
			url::Url::parse(&rendered).map_err(|e| GatewayError::UrlParse(e.to_string()))?;
		append_query(&self.def, &self.url_template, &mut url, &resolved)?;

		let mut headers = build_headers(&self.def, &resolved)?;
		self.authenticator.authenticate(&mut headers).await?;

		let body = build_body(&self.def, &self.method, None, &inputs, &resolved)?;

		security::is_safe_url(url.as_str())?;

		if req.dry_run {
			let mut request = Map::new();
			request.insert("method".into(), json!(self.method.as_str()));
			request.insert("url".into(), json!(url.as_str()));
			request.insert("headers".into(), headers_to_json(&headers));
			if let Some(body) = &body {
				request.insert("body".into(), json!(body));
			}
			return Ok(json!({"dry_run": true, "request": request}));
		}

		let conn = pool.get(ctx.cancellation()).await?;
		let mut builder = conn
			.client
			.request(self.method.clone(), url.clone())
			.headers(headers);
		if let Some(body) = &body {
			builder = builder
				.header(http::header::CONTENT_TYPE, "application/json")
				.body(body.clone());
		}

		let response = tokio::select! {
			r = builder.send() => r,
			_ = ctx.cancellation().cancelled() => {
				pool.put(conn);
				return Err(GatewayError::Cancelled);
			},
		};
		let response = match response {
			Ok(r) => r,
			Err(e) => {
				pool.put(conn);
				warn!(
					target: "gateway",
					url = %security::redact_url(url.as_str(), &Default::default()),
					error = %security::sanitize_upstream_error(&e.to_string()),
					"upstream openapi request failed"
				);
				return Err(GatewayError::UpstreamOpenApi(0));
			},
		};

		let status = response.status();
		let body_bytes = read_body_capped(response, config::max_response_body_size()).await;
		pool.put(conn);
		let body_bytes = body_bytes?;

		if !status.is_success() {
			warn!(
				target: "gateway",
				url = %security::redact_url(url.as_str(), &Default::default()),
				status = status.as_u16(),
				"upstream openapi error"
			);
			return Err(GatewayError::UpstreamOpenApi(status.as_u16()));
		}

		self.output.apply(&body_bytes)
	}

	fn cache_config(&self) -> Option<CacheConfig> {
		self.cache
	}
}
