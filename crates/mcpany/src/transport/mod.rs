// Transport adapters
//
// Seven transports share one capability surface: expose the descriptor,
// expose the MCP-facing tool spec, execute a request, and report the
// per-tool cache configuration. Adapters construct the wire request,
// apply the shared security validators, resolve secrets just-in-time,
// call the upstream through the pool, and shape the response.

pub mod grpc;
pub mod http;
pub mod mcp;
pub mod openapi;
pub mod subprocess;
pub mod webrtc;
pub mod websocket;

pub use grpc::GrpcTool;
pub use http::{HttpConn, HttpTool};
pub use mcp::{McpClient, McpProxyTool};
pub use openapi::{OpenApiOperation, OpenApiParam, OpenApiTool};
pub use subprocess::SubprocessTool;
pub use webrtc::{RtcDataChannel, RtcPeer, WebRtcTool};
pub use websocket::{WebSocketTool, WsConn};

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::errors::GatewayError;
use crate::pipeline::{CallContext, ExecutionRequest};
use crate::registry::{ToolAnnotations, ToolDef};

/// Per-tool configuration read by the external caching middleware.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheConfig {
	pub enabled: bool,
	pub ttl: Option<Duration>,
}

/// MCP-facing tool description.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolSpec {
	pub name: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	pub input_schema: Value,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub output_schema: Option<Value>,
	pub annotations: ToolAnnotations,
}

/// The polymorphic tool surface shared by every transport.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
	fn tool(&self) -> &ToolDef;

	fn mcp_tool(&self) -> McpToolSpec {
		let def = self.tool();
		McpToolSpec {
			name: def.name.clone(),
			description: def.description.clone(),
			input_schema: def
				.input_schema
				.clone()
				.unwrap_or_else(|| json!({"type": "object"})),
			output_schema: def.output_schema.clone(),
			annotations: def.annotations,
		}
	}

	async fn execute(
		&self,
		ctx: &CallContext,
		req: &ExecutionRequest,
	) -> Result<Value, GatewayError>;

	fn cache_config(&self) -> Option<CacheConfig> {
		None
	}
}

/// Decode the request's argument object, preferring the already-decoded
/// map over the raw bytes.
pub(crate) fn decode_inputs(req: &ExecutionRequest) -> Result<Map<String, Value>, GatewayError> {
	if let Some(args) = &req.arguments {
		return Ok(args.clone());
	}
	if req.tool_inputs.is_empty() {
		return Ok(Map::new());
	}
	let value: Value = serde_json::from_slice(&req.tool_inputs)
		.map_err(|e| GatewayError::UnmarshalInputs(e.to_string()))?;
	match value {
		Value::Object(map) => Ok(map),
		Value::Null => Ok(Map::new()),
		other => Err(GatewayError::UnmarshalInputs(format!(
			"expected a JSON object, got {other}"
		))),
	}
}

/// Stringify a JSON value for template substitution: strings verbatim,
/// null as empty, everything else in its JSON form.
pub(crate) fn value_to_param_string(value: &Value) -> String {
	match value {
		Value::String(s) => s.clone(),
		Value::Null => String::new(),
		other => other.to_string(),
	}
}

/// Enforce that every required declared parameter is present.
/// Secret-backed parameters are resolved out-of-band and exempt.
pub(crate) fn check_required(
	def: &ToolDef,
	inputs: &Map<String, Value>,
) -> Result<(), GatewayError> {
	for mapping in &def.parameters {
		if mapping.schema.required && !mapping.is_secret() && !inputs.contains_key(mapping.name()) {
			return Err(GatewayError::MissingRequiredParameter(
				mapping.name().to_string(),
			));
		}
	}
	Ok(())
}

/// Resolve secret-backed parameter values; non-secret parameters pass
/// through from the inputs.
pub(crate) async fn resolve_param_values(
	def: &ToolDef,
	inputs: &Map<String, Value>,
	secrets: &dyn crate::secret::SecretResolver,
) -> Result<HashMap<String, String>, GatewayError> {
	let mut out = HashMap::new();
	for mapping in &def.parameters {
		if let Some(secret) = &mapping.secret {
			out.insert(mapping.name().to_string(), secrets.resolve(secret).await?);
		} else if let Some(value) = inputs.get(mapping.name()) {
			out.insert(mapping.name().to_string(), value_to_param_string(value));
		}
	}
	Ok(out)
}

/// Split an HTTP-style FQN (`<VERB> <URL-template>`). Only the first space
/// separates verb from URL; later spaces belong to the URL.
pub(crate) fn split_http_fqn(fqn: &str) -> Result<(::http::Method, &str), GatewayError> {
	let (verb, url) = fqn
		.split_once(' ')
		.ok_or(GatewayError::InvalidHttpDefinition)?;
	if url.trim().is_empty() {
		return Err(GatewayError::InvalidHttpDefinition);
	}
	let method = verb
		.parse::<::http::Method>()
		.map_err(|_| GatewayError::InvalidHttpDefinition)?;
	Ok((method, url))
}

/// Read a reqwest response body with the configured size cap.
pub(crate) async fn read_body_capped(
	response: reqwest::Response,
	cap: usize,
) -> Result<Vec<u8>, GatewayError> {
	use futures_util::StreamExt;

	let mut out = Vec::new();
	let mut stream = response.bytes_stream();
	while let Some(chunk) = stream.next().await {
		let chunk = chunk.map_err(|e| GatewayError::Internal(format!("body read failed: {e}")))?;
		if out.len() + chunk.len() > cap {
			return Err(GatewayError::ResponseTooLarge);
		}
		out.extend_from_slice(&chunk);
	}
	Ok(out)
}
