// HTTP adapter
//
// The FQN is `<VERB> <URL-template>`; only the first space separates the
// verb, so URL templates may themselves contain spaces. Per call the
// adapter resolves secrets, substitutes parameters into the URL template
// (path values traversal-checked and escaped, query values always escaped
// when secret-backed), appends loose query parameters, builds the body
// from the input template or the remaining body parameters, screens the
// final URL, and shapes the response. Dry runs return the constructed
// request without issuing it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::warn;

use super::{
	check_required, decode_inputs, read_body_capped, resolve_param_values, split_http_fqn,
	CacheConfig, ToolExecutor,
};
use crate::auth::Authenticator;
use crate::config;
use crate::errors::GatewayError;
use crate::pipeline::{CallContext, ExecutionRequest};
use crate::pool::{Pool, PoolManager};
use crate::registry::{ParamLocation, ToolDef};
use crate::secret::SecretResolver;
use crate::security;
use crate::template::{OutputTransformer, Template};

/// Pooled HTTP client handle.
#[derive(Clone)]
pub struct HttpConn {
	pub client: reqwest::Client,
}

impl HttpConn {
	pub fn new() -> Self {
		Self {
			client: reqwest::Client::new(),
		}
	}
}

impl Default for HttpConn {
	fn default() -> Self {
		Self::new()
	}
}

pub struct HttpTool {
	def: ToolDef,
	method: http::Method,
	url_template: Template,
	input_template: Option<Template>,
	output: OutputTransformer,
	pools: Arc<PoolManager>,
	authenticator: Arc<dyn Authenticator>,
	secrets: Arc<dyn SecretResolver>,
	cache: Option<CacheConfig>,
	max_response_bytes: Option<usize>,
}

impl HttpTool {
	pub fn new(
		def: ToolDef,
		pools: Arc<PoolManager>,
		authenticator: Arc<dyn Authenticator>,
		secrets: Arc<dyn SecretResolver>,
	) -> Result<Self, GatewayError> {
		let (method, url) = split_http_fqn(&def.method_fqn)?;
		let url_template =
			Template::parse(url).map_err(|_| GatewayError::InvalidHttpDefinition)?;
		let input_template = def
			.input_template
			.as_deref()
			.map(Template::parse)
			.transpose()
			.map_err(GatewayError::InputTemplateParse)?;
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
			input_template,
			output,
			pools,
			authenticator,
			secrets,
			cache: None,
			max_response_bytes: None,
		})
	}

	pub fn with_cache_config(mut self, cache: CacheConfig) -> Self {
		self.cache = Some(cache);
		self
	}

	/// Override the environment-configured response body cap.
	pub fn with_max_response_bytes(mut self, cap: usize) -> Self {
		self.max_response_bytes = Some(cap);
		self
	}

	fn secret_param_names(&self) -> HashSet<String> {
		self
			.def
			.parameters
			.iter()
			.filter(|p| p.is_secret())
			.map(|p| p.name().to_string())
			.collect()
	}
}

/// Verbs whose requests carry a JSON body of the leftover parameters.
pub(crate) fn verb_has_body(method: &http::Method) -> bool {
	matches!(
		*method,
		http::Method::POST | http::Method::PUT | http::Method::PATCH | http::Method::DELETE
	)
}

/// Substitute parameters into a URL template. Path-positioned values are
/// traversal-checked; everything substituted into the URL is escaped
/// unless the mapping opted out (secrets never opt out).
pub(crate) fn render_url(
	def: &ToolDef,
	template: &Template,
	resolved: &HashMap<String, String>,
) -> Result<String, GatewayError> {
	let mut values = HashMap::new();
	let mut required = HashSet::new();
	for mapping in &def.parameters {
		let name = mapping.name();
		if !template.has_placeholder(name) {
			continue;
		}
		if mapping.schema.required {
			required.insert(name.to_string());
		}
		let Some(raw) = resolved.get(name) else {
			continue;
		};
		if mapping.location == ParamLocation::Path {
			security::check_path_traversal(raw)?;
		}
		let value = if mapping.disable_escape && !mapping.is_secret() {
			security::check_unescaped_value(name, raw)?;
			raw.clone()
		} else {
			security::url_encode(raw)
		};
		values.insert(name.to_string(), value);
	}
	template.render(&values, &required)
}

/// Append query parameters not already placed by the URL template.
pub(crate) fn append_query(
	def: &ToolDef,
	template: &Template,
	url: &mut url::Url,
	resolved: &HashMap<String, String>,
) -> Result<(), GatewayError> {
	let mut parts: Vec<String> = url.query().map(|q| vec![q.to_string()]).unwrap_or_default();
	for mapping in &def.parameters {
		let name = mapping.name();
		if mapping.location != ParamLocation::Query || template.has_placeholder(name) {
			continue;
		}
		let Some(raw) = resolved.get(name) else {
			continue;
		};
		// Secrets are always URL-encoded in query position.
		let value = if mapping.disable_escape && !mapping.is_secret() {
			security::check_unescaped_value(name, raw)?;
			raw.clone()
		} else {
			security::url_encode(raw)
		};
		parts.push(format!("{}={}", security::url_encode(name), value));
	}
	if !parts.is_empty() {
		url.set_query(Some(&parts.join("&")));
	}
	Ok(())
}

pub(crate) fn build_headers(
	def: &ToolDef,
	resolved: &HashMap<String, String>,
) -> Result<http::HeaderMap, GatewayError> {
	let mut headers = http::HeaderMap::new();
	for mapping in &def.parameters {
		if mapping.location != ParamLocation::Header {
			continue;
		}
		let name = mapping.name();
		let Some(value) = resolved.get(name) else {
			continue;
		};
		let header_name = http::HeaderName::from_bytes(name.as_bytes())
			.map_err(|e| GatewayError::InvalidTool(format!("invalid header name {name:?}: {e}")))?;
		let header_value = http::HeaderValue::from_str(value)
			.map_err(|e| GatewayError::InvalidTool(format!("invalid header value for {name:?}: {e}")))?;
		headers.insert(header_name, header_value);
	}
	Ok(headers)
}

/// Render the declared input template, or marshal the leftover body
/// parameters for body-bearing verbs.
pub(crate) fn build_body(
	def: &ToolDef,
	method: &http::Method,
	input_template: Option<&Template>,
	inputs: &Map<String, Value>,
	resolved: &HashMap<String, String>,
) -> Result<Option<String>, GatewayError> {
	if let Some(template) = input_template {
		let mut values = HashMap::new();
		let mut required = HashSet::new();
		for mapping in &def.parameters {
			let name = mapping.name();
			if mapping.schema.required {
				required.insert(name.to_string());
			}
			if let Some(raw) = resolved.get(name) {
				let value = if mapping.disable_escape {
					raw.clone()
				} else {
					security::json_encode(raw)
				};
				values.insert(name.to_string(), value);
			}
		}
		let rendered = template.render(&values, &required)?;
		// The body goes out as application/json; a substitution that breaks
		// the template's JSON shape (unescaped quotes via disable_escape) is
		// a render failure, not an upstream one.
		serde_json::from_str::<Value>(&rendered)
			.map_err(|e| GatewayError::InputTemplateRender(e.to_string()))?;
		return Ok(Some(rendered));
	}

	if !verb_has_body(method) {
		return Ok(None);
	}

	// Parameters without a URL position land in the body; undeclared
	// inputs pass through untouched.
	let positioned: HashSet<&str> = def
		.parameters
		.iter()
		.filter(|p| {
			matches!(
				p.location,
				ParamLocation::Path | ParamLocation::Query | ParamLocation::Header
			)
		})
		.map(|p| p.name())
		.collect();
	let mut body = Map::new();
	for (key, value) in inputs {
		if positioned.contains(key.as_str()) {
			continue;
		}
		body.insert(key.clone(), value.clone());
	}
	for mapping in &def.parameters {
		if mapping.location == ParamLocation::Body && mapping.is_secret() {
			if let Some(value) = resolved.get(mapping.name()) {
				body.insert(mapping.name().to_string(), Value::String(value.clone()));
			}
		}
	}
	if body.is_empty() {
		return Ok(None);
	}
	serde_json::to_string(&Value::Object(body))
		.map(Some)
		.map_err(|e| GatewayError::Internal(format!("failed to marshal body: {e}")))
}

pub(crate) fn headers_to_json(headers: &http::HeaderMap) -> Value {
	let mut out = Map::new();
	for (name, value) in headers {
		out.insert(
			name.as_str().to_string(),
			Value::String(value.to_str().unwrap_or_default().to_string()),
		);
	}
	Value::Object(out)
}

#[async_trait]
impl ToolExecutor for HttpTool {
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
		let resolved = resolve_param_values(&self.def, &inputs, self.secrets.as_ref()).await?;

		let rendered = render_url(&self.def, &self.url_template, &resolved)?;
		let mut url =
			url::Url::parse(&rendered).map_err(|e| GatewayError::UrlParse(e.to_string()))?;
		append_query(&self.def, &self.url_template, &mut url, &resolved)?;

		let mut headers = build_headers(&self.def, &resolved)?;
		self.authenticator.authenticate(&mut headers).await?;

		let body = build_body(
			&self.def,
			&self.method,
			self.input_template.as_ref(),
			&inputs,
			&resolved,
		)?;

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

		let secret_names = self.secret_param_names();
		let response = match response {
			Ok(r) => r,
			Err(e) => {
				warn!(
					target: "gateway",
					url = %security::redact_url(url.as_str(), &secret_names),
					error = %security::sanitize_upstream_error(&e.to_string()),
					"upstream http request failed"
				);
				// Client handles are stateless; the pool keeps them.
				pool.put(conn);
				return Err(GatewayError::UpstreamHttp {
					status: 0,
					body: security::sanitize_upstream_error(&e.to_string()),
				});
			},
		};

		let status = response.status();
		let cap = self
			.max_response_bytes
			.unwrap_or_else(config::max_response_body_size);
		let body_bytes = read_body_capped(response, cap).await;
		pool.put(conn);
		let body_bytes = body_bytes?;

		if !status.is_success() {
			warn!(
				target: "gateway",
				url = %security::redact_url(url.as_str(), &secret_names),
				status = status.as_u16(),
				"upstream http error"
			);
			let body_text = if config::debug_enabled() {
				security::sanitize_upstream_error(&String::from_utf8_lossy(&body_bytes))
			} else {
				"[Body hidden for security. Enable debug mode to view.]".to_string()
			};
			return Err(GatewayError::UpstreamHttp {
				status: status.as_u16(),
				body: body_text,
			});
		}

		self.output.apply(&body_bytes)
	}

	fn cache_config(&self) -> Option<CacheConfig> {
		self.cache
	}
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
