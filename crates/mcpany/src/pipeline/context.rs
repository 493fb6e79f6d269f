// Per-invocation context
//
// One CallContext accompanies one invocation through the pipeline. It
// carries the caller's cancellation token (the single cancellation source
// every suspension point honours), the resolved tool handle, and the
// cache-control signal read by the external caching middleware.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::transport::ToolExecutor;

/// Directive for the external caching middleware.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheAction {
	#[default]
	Allow,
	SaveCache,
	DeleteCache,
	Deny,
}

/// Pipeline-scoped cache-control cell, initialised to `Allow` for every
/// invocation.
#[derive(Debug, Default)]
pub struct CacheControl {
	action: Mutex<CacheAction>,
}

impl CacheControl {
	pub fn get(&self) -> CacheAction {
		*self.action.lock()
	}

	pub fn set(&self, action: CacheAction) {
		*self.action.lock() = action;
	}

	pub(crate) fn reset(&self) {
		*self.action.lock() = CacheAction::Allow;
	}
}

/// One tool invocation as received from the client. Never mutated after
/// the pre-hook chain completes; hooks replace the whole request instead.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
	/// Client-facing tool name.
	pub tool_name: String,

	/// Raw JSON argument bytes.
	pub tool_inputs: Bytes,

	/// Decoded argument map, when the caller already decoded it.
	pub arguments: Option<Map<String, Value>>,

	pub dry_run: bool,

	/// Opaque id for tracing and history correlation.
	pub call_id: String,
}

impl ExecutionRequest {
	/// Build a request from a decoded argument value.
	pub fn new(tool_name: impl Into<String>, inputs: Value) -> Self {
		let arguments = inputs.as_object().cloned();
		let tool_inputs = Bytes::from(serde_json::to_vec(&inputs).unwrap_or_default());
		Self {
			tool_name: tool_name.into(),
			tool_inputs,
			arguments,
			dry_run: false,
			call_id: Uuid::new_v4().to_string(),
		}
	}

	/// Build a request from raw JSON bytes without decoding them.
	pub fn from_raw(tool_name: impl Into<String>, tool_inputs: impl Into<Bytes>) -> Self {
		Self {
			tool_name: tool_name.into(),
			tool_inputs: tool_inputs.into(),
			arguments: None,
			dry_run: false,
			call_id: Uuid::new_v4().to_string(),
		}
	}

	pub fn with_dry_run(mut self) -> Self {
		self.dry_run = true;
		self
	}

	/// Derive the replacement request a pre-hook returns: same identity,
	/// new inputs.
	pub fn replaced_with(&self, inputs: Value) -> Self {
		Self {
			tool_name: self.tool_name.clone(),
			tool_inputs: Bytes::from(serde_json::to_vec(&inputs).unwrap_or_default()),
			arguments: inputs.as_object().cloned(),
			dry_run: self.dry_run,
			call_id: self.call_id.clone(),
		}
	}
}

/// Per-invocation context handed to hooks, middleware and adapters.
pub struct CallContext {
	cancel: CancellationToken,
	cache: CacheControl,
	tool: RwLock<Option<Arc<dyn ToolExecutor>>>,
}

impl Default for CallContext {
	fn default() -> Self {
		Self::new()
	}
}

impl CallContext {
	pub fn new() -> Self {
		Self::with_cancellation(CancellationToken::new())
	}

	/// Bind the context to the caller's cancellation token.
	pub fn with_cancellation(cancel: CancellationToken) -> Self {
		Self {
			cancel,
			cache: CacheControl::default(),
			tool: RwLock::new(None),
		}
	}

	pub fn cancellation(&self) -> &CancellationToken {
		&self.cancel
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancel.is_cancelled()
	}

	pub fn cache_control(&self) -> &CacheControl {
		&self.cache
	}

	/// The tool being executed, once the pipeline has resolved it.
	pub fn tool(&self) -> Option<Arc<dyn ToolExecutor>> {
		self.tool.read().clone()
	}

	pub(crate) fn begin_invocation(&self, tool: Arc<dyn ToolExecutor>) {
		*self.tool.write() = Some(tool);
		self.cache.reset();
	}
}
