// Service descriptors
//
// An upstream system and its derived hook chains. Hooks and the compiled
// policy are built once at registration; health flips at runtime without
// touching the registered tools.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::auth::Authenticator;
use crate::hooks::{PolicyPreHook, PostHook, PreHook, WebhookConfig, WebhookHook};
use crate::policy::{CompiledPolicy, PolicySpec};

#[derive(Debug, Clone, Default)]
pub struct ServiceHealth {
	pub healthy: bool,
	pub last_error: Option<String>,
}

#[derive(Clone)]
pub struct ServiceInfo {
	pub id: String,

	/// Raw upstream configuration as supplied by the registrar.
	pub config: Value,

	pub policy: Option<Arc<CompiledPolicy>>,

	/// Ordered pre-hook chain (policy first, then webhook).
	pub pre_hooks: Vec<Arc<dyn PreHook>>,

	/// Ordered post-hook chain.
	pub post_hooks: Vec<Arc<dyn PostHook>>,

	pub health: ServiceHealth,
}

impl ServiceInfo {
	pub fn new(id: impl Into<String>, config: Value) -> Self {
		Self {
			id: id.into(),
			config,
			policy: None,
			pre_hooks: Vec::new(),
			post_hooks: Vec::new(),
			health: ServiceHealth {
				healthy: true,
				last_error: None,
			},
		}
	}

	/// Compile the policy and install it at the front of the pre-hook
	/// chain.
	pub fn with_policy(mut self, spec: &PolicySpec) -> Self {
		let compiled = Arc::new(CompiledPolicy::compile(spec));
		self.policy = Some(compiled.clone());
		self
			.pre_hooks
			.insert(0, Arc::new(PolicyPreHook::new(compiled)));
		self
	}

	/// Install the webhook in both hook positions.
	pub fn with_webhook(mut self, config: WebhookConfig, authenticator: Arc<dyn Authenticator>) -> Self {
		let hook = Arc::new(WebhookHook::new(config, authenticator));
		self.pre_hooks.push(hook.clone());
		self.post_hooks.push(hook);
		self
	}
}

impl fmt::Debug for ServiceInfo {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ServiceInfo")
			.field("id", &self.id)
			.field("health", &self.health)
			.field("pre_hooks", &self.pre_hooks.len())
			.field("post_hooks", &self.post_hooks.len())
			.finish()
	}
}
