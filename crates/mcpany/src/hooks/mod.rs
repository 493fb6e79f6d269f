// Hook chains
//
// Pre-hooks run before the transport call and may deny, allow, adjust the
// cache-control signal, or replace the request for all subsequent stages.
// Post-hooks run after the transport call and may replace the result.
// Chains are ordered vectors; composition is a fold over the slice, and a
// hook error terminates the chain. A pre-hook must never perform the
// upstream call itself.

mod policy;
mod webhook;

pub use policy::PolicyPreHook;
pub use webhook::{WebhookConfig, WebhookHook, WEBHOOK_DEFAULT_TIMEOUT};

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::errors::GatewayError;
use crate::pipeline::{CallContext, ExecutionRequest};

/// Outcome of one pre-hook.
#[derive(Debug)]
pub enum PreHookOutcome {
	/// Proceed with the current request.
	Continue,
	/// Proceed with a replacement request.
	ReplaceRequest(ExecutionRequest),
}

#[async_trait]
pub trait PreHook: Send + Sync {
	fn name(&self) -> &str;

	async fn execute_pre(
		&self,
		ctx: &CallContext,
		req: &ExecutionRequest,
	) -> Result<PreHookOutcome, GatewayError>;
}

#[async_trait]
pub trait PostHook: Send + Sync {
	fn name(&self) -> &str;

	/// May return a replacement for `result`; returning it unchanged is the
	/// no-op.
	async fn execute_post(
		&self,
		ctx: &CallContext,
		req: &ExecutionRequest,
		result: Value,
	) -> Result<Value, GatewayError>;
}

/// Run pre-hooks in registration order, threading request replacements.
pub async fn run_pre_hooks(
	hooks: &[Arc<dyn PreHook>],
	ctx: &CallContext,
	mut req: ExecutionRequest,
) -> Result<ExecutionRequest, GatewayError> {
	for hook in hooks {
		match hook.execute_pre(ctx, &req).await? {
			PreHookOutcome::Continue => {},
			PreHookOutcome::ReplaceRequest(replacement) => {
				tracing::debug!(
					target: "gateway",
					hook = hook.name(),
					tool = %req.tool_name,
					"pre-hook replaced request"
				);
				req = replacement;
			},
		}
	}
	Ok(req)
}

/// Run post-hooks in registration order, threading result replacements.
pub async fn run_post_hooks(
	hooks: &[Arc<dyn PostHook>],
	ctx: &CallContext,
	req: &ExecutionRequest,
	mut result: Value,
) -> Result<Value, GatewayError> {
	for hook in hooks {
		result = hook.execute_post(ctx, req, result).await?;
	}
	Ok(result)
}
