// Execution pipeline
//
// resolve -> health gate -> pre-hooks -> middleware -> transport call ->
// post-hooks -> history append. Pre-hooks run in registration order and
// may replace the request; middleware wraps so the first added is
// outermost; post-hooks may replace the result. The history append is a
// terminal side-effect that happens exactly once per invocation, and a
// panic anywhere inside the chain is caught at the pipeline boundary and
// surfaced as an error.

mod context;

pub use context::{CacheAction, CacheControl, CallContext, ExecutionRequest};

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;
use tracing::{debug, error};

use crate::activity::ActivityEvent;
use crate::errors::GatewayError;
use crate::history::ExecutionRecord;
use crate::hooks::{run_post_hooks, run_pre_hooks};
use crate::registry::ToolRegistry;

/// A wrap-around capability (caching, metrics, tracing) composed around
/// the transport call. `next.run(...)` continues the chain; not calling it
/// short-circuits.
#[async_trait]
pub trait Middleware: Send + Sync {
	fn name(&self) -> &str;

	async fn handle<'a>(
		&'a self,
		ctx: &'a CallContext,
		req: ExecutionRequest,
		next: Next<'a>,
	) -> Result<Value, GatewayError>;
}

type CoreFn<'a> =
	dyn Fn(ExecutionRequest) -> BoxFuture<'a, Result<Value, GatewayError>> + Send + Sync + 'a;

/// Continuation handed to middleware: the remaining middleware slice plus
/// the terminal transport call.
pub struct Next<'a> {
	middlewares: &'a [Arc<dyn Middleware>],
	core: &'a CoreFn<'a>,
}

impl<'a> Next<'a> {
	pub async fn run(
		self,
		ctx: &'a CallContext,
		req: ExecutionRequest,
	) -> Result<Value, GatewayError> {
		match self.middlewares.split_first() {
			Some((head, rest)) => {
				head
					.handle(
						ctx,
						req,
						Next {
							middlewares: rest,
							core: self.core,
						},
					)
					.await
			},
			None => (self.core)(req).await,
		}
	}
}

/// Run one invocation through the full pipeline.
pub async fn execute_tool(
	registry: &ToolRegistry,
	ctx: &CallContext,
	req: ExecutionRequest,
) -> Result<Value, GatewayError> {
	let tool_name = req.tool_name.clone();
	let started = Instant::now();

	let result = run_pipeline(registry, ctx, req).await;

	// History append is best-effort and happens exactly once, in every
	// outcome including hook denials and caught panics.
	let record = match &result {
		Ok(_) => ExecutionRecord::success(tool_name.clone(), started.elapsed()),
		Err(e) => ExecutionRecord::failure(tool_name.clone(), started.elapsed(), e.to_string()),
	};
	let success = record.success;
	registry.history().add(record);
	registry.emit(ActivityEvent::ToolExecuted { tool_name, success });

	result
}

async fn run_pipeline(
	registry: &ToolRegistry,
	ctx: &CallContext,
	req: ExecutionRequest,
) -> Result<Value, GatewayError> {
	if ctx.is_cancelled() {
		return Err(GatewayError::Cancelled);
	}

	let tool = registry
		.get_tool(&req.tool_name)
		.ok_or(GatewayError::ToolNotFound)?;
	let def = tool.tool();

	// A tool may run without a registered service; it just has no hooks.
	let service = registry.get_service_info(&def.service_id);
	if let Some(service) = &service {
		if !service.health.healthy {
			return Err(GatewayError::ServiceUnhealthy(service.id.clone()));
		}
	}

	ctx.begin_invocation(tool.clone());

	let (pre_hooks, post_hooks) = service
		.map(|s| (s.pre_hooks, s.post_hooks))
		.unwrap_or_default();
	let middlewares = registry.middlewares();

	let tool_for_core = tool.clone();
	let post_hooks = Arc::new(post_hooks);
	let guarded = async {
		let req = run_pre_hooks(&pre_hooks, ctx, req).await?;

		let core = move |req: ExecutionRequest| {
			let tool = tool_for_core.clone();
			let post_hooks = post_hooks.clone();
			async move {
				let result = tool.execute(ctx, &req).await?;
				run_post_hooks(&post_hooks, ctx, &req, result).await
			}
			.boxed()
		};

		debug!(
			target: "gateway",
			tool = %req.tool_name,
			call_id = %req.call_id,
			middlewares = middlewares.len(),
			"entering middleware chain"
		);

		Next {
			middlewares: &middlewares,
			core: &core,
		}
		.run(ctx, req)
		.await
	};

	match std::panic::AssertUnwindSafe(guarded).catch_unwind().await {
		Ok(result) => result,
		Err(panic) => {
			let message = panic_message(panic);
			error!(target: "gateway", panic = %message, "panic caught at pipeline boundary");
			Err(GatewayError::Internal(format!("panic: {message}")))
		},
	}
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
	if let Some(s) = panic.downcast_ref::<&str>() {
		(*s).to_string()
	} else if let Some(s) = panic.downcast_ref::<String>() {
		s.clone()
	} else {
		"unknown panic".to_string()
	}
}
