// WebSocket adapter
//
// One-shot request/response: a single text frame is written and a single
// frame read back, on a connection checked out from the pool for the
// duration of the exchange. Responses that do not parse as JSON are
// returned as raw text. Broken connections are not returned to the pool.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::warn;

use super::{check_required, decode_inputs, resolve_param_values, CacheConfig, ToolExecutor};
use crate::errors::GatewayError;
use crate::pipeline::{CallContext, ExecutionRequest};
use crate::pool::{Pool, PoolManager};
use crate::registry::ToolDef;
use crate::security;
use crate::template::{OutputTransformer, Template};

/// Pooled WebSocket connection.
pub struct WsConn {
	pub stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

pub struct WebSocketTool {
	def: ToolDef,
	input_template: Option<Template>,
	output: OutputTransformer,
	pools: Arc<PoolManager>,
	secrets: Arc<dyn crate::secret::SecretResolver>,
	cache: Option<CacheConfig>,
}

impl WebSocketTool {
	pub fn new(
		def: ToolDef,
		pools: Arc<PoolManager>,
		secrets: Arc<dyn crate::secret::SecretResolver>,
	) -> Result<Self, GatewayError> {
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
			input_template,
			output,
			pools,
			secrets,
			cache: None,
		})
	}

	pub fn with_cache_config(mut self, cache: CacheConfig) -> Self {
		self.cache = Some(cache);
		self
	}

	fn build_message(&self, req: &ExecutionRequest, resolved: &HashMap<String, String>) -> Result<String, GatewayError> {
		if let Some(template) = &self.input_template {
			let mut values = HashMap::new();
			let mut required = HashSet::new();
			for mapping in &self.def.parameters {
				if mapping.schema.required {
					required.insert(mapping.name().to_string());
				}
				if let Some(raw) = resolved.get(mapping.name()) {
					let value = if mapping.disable_escape {
						raw.clone()
					} else {
						security::json_encode(raw)
					};
					values.insert(mapping.name().to_string(), value);
				}
			}
			return template.render(&values, &required);
		}
		Ok(String::from_utf8_lossy(&req.tool_inputs).into_owned())
	}

	async fn exchange(
		&self,
		ctx: &CallContext,
		conn: &mut WsConn,
		message: String,
	) -> Result<String, GatewayError> {
		tokio::select! {
			r = conn.stream.send(Message::Text(message.into())) => {
				r.map_err(|e| GatewayError::WebSocketExchange(e.to_string()))?;
			},
			_ = ctx.cancellation().cancelled() => return Err(GatewayError::Cancelled),
		}

		loop {
			let frame = tokio::select! {
				f = conn.stream.next() => f,
				_ = ctx.cancellation().cancelled() => return Err(GatewayError::Cancelled),
			};
			let frame = frame
				.ok_or_else(|| GatewayError::WebSocketExchange("connection closed".to_string()))?
				.map_err(|e| GatewayError::WebSocketExchange(e.to_string()))?;
			match frame {
				Message::Text(text) => return Ok(text.to_string()),
				Message::Binary(bytes) => {
					return Ok(String::from_utf8_lossy(&bytes).into_owned());
				},
				// Control frames are not the response.
				Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
				Message::Close(_) => {
					return Err(GatewayError::WebSocketExchange(
						"connection closed before response".to_string(),
					));
				},
			}
		}
	}
}

#[async_trait]
impl ToolExecutor for WebSocketTool {
	fn tool(&self) -> &ToolDef {
		&self.def
	}

	async fn execute(
		&self,
		ctx: &CallContext,
		req: &ExecutionRequest,
	) -> Result<Value, GatewayError> {
		let pool: Arc<dyn Pool<WsConn>> = self
			.pools
			.get_by_type::<WsConn>(&self.def.service_id)
			.ok_or_else(|| GatewayError::pool_not_found("websocket", &self.def.service_id))?;

		let inputs = decode_inputs(req)?;
		check_required(&self.def, &inputs)?;
		let resolved = resolve_param_values(&self.def, &inputs, self.secrets.as_ref()).await?;
		let message = self.build_message(req, &resolved)?;

		let mut conn = pool.get(ctx.cancellation()).await?;
		match self.exchange(ctx, &mut conn, message).await {
			Ok(text) => {
				pool.put(conn);
				// JSON when it parses, raw text otherwise.
				match serde_json::from_str::<Value>(&text) {
					Ok(value) => Ok(value),
					Err(_) => Ok(Value::String(text)),
				}
			},
			Err(e) => {
				// The exchange is mid-protocol on failure; discard the
				// connection rather than returning it.
				warn!(target: "gateway", tool = %self.def.name, error = %e, "websocket exchange failed");
				Err(e)
			},
		}
	}

	fn cache_config(&self) -> Option<CacheConfig> {
		self.cache
	}
}
