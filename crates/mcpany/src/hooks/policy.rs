// Policy pre-hook
//
// Evaluates the service's compiled policy against the tool name and raw
// argument bytes. Deny terminates the pipeline; cache directives are
// recorded on the invocation's cache-control signal and execution
// continues.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{PreHook, PreHookOutcome};
use crate::errors::GatewayError;
use crate::pipeline::{CacheAction, CallContext, ExecutionRequest};
use crate::policy::{CompiledPolicy, PolicyAction, PolicyDecision};

pub struct PolicyPreHook {
	policy: Arc<CompiledPolicy>,
}

impl PolicyPreHook {
	pub fn new(policy: Arc<CompiledPolicy>) -> Self {
		Self { policy }
	}
}

#[async_trait]
impl PreHook for PolicyPreHook {
	fn name(&self) -> &str {
		"policy"
	}

	async fn execute_pre(
		&self,
		ctx: &CallContext,
		req: &ExecutionRequest,
	) -> Result<PreHookOutcome, GatewayError> {
		let decision = self.policy.evaluate(&req.tool_name, &req.tool_inputs);
		debug!(target: "gateway", tool = %req.tool_name, ?decision, "policy evaluated");
		match decision {
			PolicyDecision::Matched(PolicyAction::Deny) => {
				Err(GatewayError::PolicyDenied(req.tool_name.clone()))
			},
			PolicyDecision::Default(PolicyAction::Deny) => {
				Err(GatewayError::DefaultPolicyDenied(req.tool_name.clone()))
			},
			PolicyDecision::Matched(PolicyAction::SaveCache)
			| PolicyDecision::Default(PolicyAction::SaveCache) => {
				ctx.cache_control().set(CacheAction::SaveCache);
				Ok(PreHookOutcome::Continue)
			},
			PolicyDecision::Matched(PolicyAction::DeleteCache)
			| PolicyDecision::Default(PolicyAction::DeleteCache) => {
				ctx.cache_control().set(CacheAction::DeleteCache);
				Ok(PreHookOutcome::Continue)
			},
			PolicyDecision::Matched(PolicyAction::Allow)
			| PolicyDecision::Default(PolicyAction::Allow) => Ok(PreHookOutcome::Continue),
		}
	}
}
