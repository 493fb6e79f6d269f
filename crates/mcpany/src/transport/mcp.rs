// Nested MCP adapter
//
// A tool backed by another model-context server. The external client is a
// non-owning collaborator behind the McpClient trait; the adapter decodes
// the inputs, forwards the call under the remote tool name, and applies
// the declared output shaping to the returned value.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{check_required, decode_inputs, CacheConfig, ToolExecutor};
use crate::errors::GatewayError;
use crate::pipeline::{CallContext, ExecutionRequest};
use crate::registry::ToolDef;
use crate::template::OutputTransformer;

/// Client for an upstream model-context server.
#[async_trait]
pub trait McpClient: Send + Sync {
	async fn call_tool(&self, tool_name: &str, arguments: Value) -> Result<Value, GatewayError>;
}

pub struct McpProxyTool {
	def: ToolDef,
	/// Tool name on the upstream server (may differ from the local name).
	remote_name: String,
	client: Arc<dyn McpClient>,
	output: OutputTransformer,
	cache: Option<CacheConfig>,
}

impl McpProxyTool {
	pub fn new(
		def: ToolDef,
		remote_name: impl Into<String>,
		client: Arc<dyn McpClient>,
	) -> Result<Self, GatewayError> {
		let output = def
			.output
			.as_ref()
			.map(OutputTransformer::compile)
			.transpose()?
			.unwrap_or_default();
		Ok(Self {
			def,
			remote_name: remote_name.into(),
			client,
			output,
			cache: None,
		})
	}

	pub fn with_cache_config(mut self, cache: CacheConfig) -> Self {
		self.cache = Some(cache);
		self
	}
}

#[async_trait]
impl ToolExecutor for McpProxyTool {
	fn tool(&self) -> &ToolDef {
		&self.def
	}

	async fn execute(
		&self,
		ctx: &CallContext,
		req: &ExecutionRequest,
	) -> Result<Value, GatewayError> {
		let inputs = decode_inputs(req)?;
		check_required(&self.def, &inputs)?;

		let call = self.client.call_tool(&self.remote_name, Value::Object(inputs));
		let result = tokio::select! {
			r = call => r?,
			_ = ctx.cancellation().cancelled() => return Err(GatewayError::Cancelled),
		};

		if self.def.output.is_some() {
			let bytes = serde_json::to_vec(&result)
				.map_err(|e| GatewayError::Internal(format!("failed to marshal result: {e}")))?;
			return self.output.apply(&bytes);
		}
		Ok(result)
	}

	fn cache_config(&self) -> Option<CacheConfig> {
		self.cache
	}
}
