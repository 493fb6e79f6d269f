// Tool registry (manager)
//
// Owns the tool catalogue: the primary id index, the client-name alias
// map, service descriptors with health, enabled profiles, and the cached
// list views. Reads take the read lock; structural mutations take the
// write lock and invalidate the cached snapshots. Execution is delegated
// to the pipeline module.

mod profile;
mod service;
mod types;

pub use profile::{
	tool_matches_profile, ProfileDefinition, ProfileSelector, ProfileServiceConfig,
};
pub use service::{ServiceHealth, ServiceInfo};
pub use types::{ParamLocation, ParamMapping, ParamSchema, ToolAnnotations, ToolDef};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::activity::{ActivityEvent, ActivityStream};
use crate::bus::{BusMessage, SignalBus};
use crate::errors::GatewayError;
use crate::history::ExecutionHistory;
use crate::pipeline::{CallContext, ExecutionRequest, Middleware};
use crate::transport::{McpToolSpec, ToolExecutor};

/// Upper bound on sanitized tool names.
const MAX_TOOL_NAME_LEN: usize = 128;

/// Strip a registrar-supplied name down to `[A-Za-z0-9_.-]`, collapse
/// runs of `.` (the id separator), and bound the length.
pub fn sanitize_tool_name(name: &str) -> String {
	let mut out: String = name
		.chars()
		.filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
		.collect();
	while out.contains("..") {
		out = out.replace("..", ".");
	}
	out.truncate(MAX_TOOL_NAME_LEN);
	out
}

#[derive(Default)]
struct RegistryState {
	/// tool_id -> executor
	tools: HashMap<String, Arc<dyn ToolExecutor>>,
	/// client-facing alias -> tool_id
	aliases: HashMap<String, String>,
	services: HashMap<String, ServiceInfo>,
	enabled_profiles: Vec<String>,
	profile_defs: HashMap<String, ProfileDefinition>,
	list_cache: Option<Arc<Vec<McpToolSpec>>>,
	profile_cache: HashMap<String, Arc<Vec<McpToolSpec>>>,
}

impl RegistryState {
	fn invalidate_caches(&mut self) {
		self.list_cache = None;
		self.profile_cache.clear();
	}
}

/// The tool registry and execution entry point.
pub struct ToolRegistry {
	state: RwLock<RegistryState>,
	history: Arc<ExecutionHistory>,
	middlewares: RwLock<Vec<Arc<dyn Middleware>>>,
	activity: RwLock<Option<ActivityStream>>,
}

impl Default for ToolRegistry {
	fn default() -> Self {
		Self::new()
	}
}

impl ToolRegistry {
	pub fn new() -> Self {
		Self {
			state: RwLock::new(RegistryState::default()),
			history: Arc::new(ExecutionHistory::default()),
			middlewares: RwLock::new(Vec::new()),
			activity: RwLock::new(None),
		}
	}

	pub fn with_history(mut self, history: ExecutionHistory) -> Self {
		self.history = Arc::new(history);
		self
	}

	/// Attach the bounded activity stream.
	pub fn set_activity_stream(&self, stream: ActivityStream) {
		*self.activity.write() = Some(stream);
	}

	pub fn history(&self) -> &Arc<ExecutionHistory> {
		&self.history
	}

	pub(crate) fn emit(&self, event: ActivityEvent) {
		if let Some(stream) = self.activity.read().as_ref() {
			stream.emit(event);
		}
	}

	/// Register a tool. The name is sanitized, the id computed as
	/// `service_id + "." + sanitized_name`, and both the raw name and the
	/// `service_id + "." + raw name` alias resolve to it. Returns `None`
	/// when active profiles filter the tool out.
	pub fn add_tool(
		&self,
		executor: Arc<dyn ToolExecutor>,
	) -> Result<Option<String>, GatewayError> {
		let def = executor.tool();
		if def.service_id.is_empty() {
			return Err(GatewayError::InvalidTool(
				"service_id cannot be empty".to_string(),
			));
		}
		let sanitized = sanitize_tool_name(&def.name);
		if sanitized.is_empty() {
			return Err(GatewayError::InvalidTool(format!(
				"tool name {:?} sanitizes to an empty string",
				def.name
			)));
		}
		let tool_id = format!("{}.{}", def.service_id, sanitized);

		let mut state = self.state.write();
		if !state.enabled_profiles.is_empty() {
			let visible = state.enabled_profiles.iter().any(|name| {
				state
					.profile_defs
					.get(name)
					.map(|p| tool_matches_profile(def, p))
					.unwrap_or(false)
			});
			if !visible {
				debug!(target: "gateway", tool = %tool_id, "tool filtered out by active profiles");
				return Ok(None);
			}
		}

		state
			.aliases
			.insert(def.name.clone(), tool_id.clone());
		state
			.aliases
			.insert(format!("{}.{}", def.service_id, def.name), tool_id.clone());
		let service_id = def.service_id.clone();
		state.tools.insert(tool_id.clone(), executor);
		state.invalidate_caches();
		drop(state);

		info!(target: "gateway", tool = %tool_id, service = %service_id, "tool registered");
		self.emit(ActivityEvent::ToolRegistered {
			tool_id: tool_id.clone(),
			service_id,
		});
		Ok(Some(tool_id))
	}

	/// Resolve a client-facing name: direct id lookup first, then alias.
	pub fn get_tool(&self, name: &str) -> Option<Arc<dyn ToolExecutor>> {
		let state = self.state.read();
		if let Some(tool) = state.tools.get(name) {
			return Some(tool.clone());
		}
		state
			.aliases
			.get(name)
			.and_then(|id| state.tools.get(id))
			.cloned()
	}

	/// Sorted snapshot of every visible tool, memoised until the next
	/// mutation. Tools of unhealthy services stay listed with a decorated
	/// description.
	pub fn list_tools(&self) -> Arc<Vec<McpToolSpec>> {
		if let Some(cached) = self.state.read().list_cache.clone() {
			return cached;
		}
		let mut state = self.state.write();
		if let Some(cached) = state.list_cache.clone() {
			return cached;
		}
		let list = Arc::new(build_tool_list(&state, None));
		state.list_cache = Some(list.clone());
		list
	}

	/// MCP view of the catalogue; identical content to [`list_tools`].
	pub fn list_mcp_tools(&self) -> Arc<Vec<McpToolSpec>> {
		self.list_tools()
	}

	/// Filtered, memoised per-profile view. Unknown profile names produce
	/// an empty list.
	pub fn list_mcp_tools_for_profile(&self, profile: &str) -> Arc<Vec<McpToolSpec>> {
		if let Some(cached) = self.state.read().profile_cache.get(profile).cloned() {
			return cached;
		}
		let mut state = self.state.write();
		if let Some(cached) = state.profile_cache.get(profile).cloned() {
			return cached;
		}
		let Some(def) = state.profile_defs.get(profile).cloned() else {
			let empty = Arc::new(Vec::new());
			state
				.profile_cache
				.insert(profile.to_string(), empty.clone());
			return empty;
		};
		let list = Arc::new(build_tool_list(&state, Some(&def)));
		state
			.profile_cache
			.insert(profile.to_string(), list.clone());
		list
	}

	/// Delete every tool owned by `service_id`.
	pub fn clear_tools_for_service(&self, service_id: &str) {
		let prefix = format!("{service_id}.");
		let mut state = self.state.write();
		let removed: Vec<String> = state
			.tools
			.keys()
			.filter(|id| id.starts_with(&prefix))
			.cloned()
			.collect();
		for id in &removed {
			state.tools.remove(id);
		}
		state
			.aliases
			.retain(|_, target| !target.starts_with(&prefix));
		state.invalidate_caches();
		drop(state);

		info!(target: "gateway", service = service_id, removed = removed.len(), "tools cleared for service");
		self.emit(ActivityEvent::ToolsCleared {
			service_id: service_id.to_string(),
		});
	}

	pub fn add_service_info(&self, info: ServiceInfo) {
		let mut state = self.state.write();
		state.services.insert(info.id.clone(), info);
		state.invalidate_caches();
	}

	/// Flip a service's health. Tools stay registered; listing decorates
	/// them and execution fails fast while unhealthy.
	pub fn update_service_health(&self, service_id: &str, healthy: bool, message: Option<String>) {
		let mut state = self.state.write();
		if let Some(service) = state.services.get_mut(service_id) {
			service.health = ServiceHealth {
				healthy,
				last_error: if healthy { None } else { message.clone() },
			};
			state.invalidate_caches();
		} else {
			warn!(target: "gateway", service = service_id, "health update for unknown service");
			return;
		}
		drop(state);
		self.emit(ActivityEvent::ServiceHealthChanged {
			service_id: service_id.to_string(),
			healthy,
		});
	}

	pub fn get_service_info(&self, service_id: &str) -> Option<ServiceInfo> {
		self.state.read().services.get(service_id).cloned()
	}

	pub fn list_services(&self) -> Vec<ServiceInfo> {
		let state = self.state.read();
		let mut services: Vec<ServiceInfo> = state.services.values().cloned().collect();
		services.sort_by(|a, b| a.id.cmp(&b.id));
		services
	}

	/// Replace the profile state wholesale.
	pub fn set_profiles(&self, enabled: Vec<String>, definitions: Vec<ProfileDefinition>) {
		let mut state = self.state.write();
		state.enabled_profiles = enabled;
		state.profile_defs = definitions
			.into_iter()
			.map(|d| (d.name.clone(), d))
			.collect();
		state.invalidate_caches();
	}

	pub fn enabled_profiles(&self) -> Vec<String> {
		self.state.read().enabled_profiles.clone()
	}

	/// Append a middleware; first added wraps outermost.
	pub fn add_middleware(&self, middleware: Arc<dyn Middleware>) {
		self.middlewares.write().push(middleware);
	}

	pub(crate) fn middlewares(&self) -> Vec<Arc<dyn Middleware>> {
		self.middlewares.read().clone()
	}

	/// Execute a tool through the full pipeline. See the pipeline module
	/// for stage ordering.
	pub async fn execute_tool(
		&self,
		ctx: &CallContext,
		req: ExecutionRequest,
	) -> Result<Value, GatewayError> {
		crate::pipeline::execute_tool(self, ctx, req).await
	}

	/// Bridge execution requests arriving over the signalling bus into the
	/// pipeline: subscribe to `<topic>.request`, execute, publish the
	/// outcome to `<topic>.response` under the same correlation id. This is
	/// the handler registered when an MCP server is attached.
	pub fn attach_bus(self: Arc<Self>, bus: Arc<dyn SignalBus>, topic: &str) -> JoinHandle<()> {
		let registry = self;
		let topic = topic.to_string();
		tokio::spawn(async move {
			let request_topic = format!("{topic}.request");
			let response_topic = format!("{topic}.response");
			let mut rx = match bus.subscribe(&request_topic).await {
				Ok(rx) => rx,
				Err(e) => {
					warn!(target: "gateway", error = %e, "failed to subscribe bus bridge");
					return;
				},
			};
			while let Some(message) = rx.recv().await {
				let registry = registry.clone();
				let bus = bus.clone();
				let response_topic = response_topic.clone();
				tokio::spawn(async move {
					let payload = bridge_execute(&registry, message.payload).await;
					let _ = bus
						.publish(
							&response_topic,
							BusMessage {
								correlation_id: message.correlation_id,
								payload,
							},
						)
						.await;
				});
			}
		})
	}
}

async fn bridge_execute(registry: &ToolRegistry, payload: Value) -> Value {
	let tool_name = payload
		.get("tool_name")
		.and_then(Value::as_str)
		.unwrap_or_default()
		.to_string();
	let inputs = payload.get("inputs").cloned().unwrap_or(Value::Null);
	let dry_run = payload
		.get("dry_run")
		.and_then(Value::as_bool)
		.unwrap_or(false);

	let mut req = ExecutionRequest::new(tool_name, inputs);
	if dry_run {
		req = req.with_dry_run();
	}
	let ctx = CallContext::new();
	match registry.execute_tool(&ctx, req).await {
		Ok(result) => serde_json::json!({"result": result}),
		Err(e) => serde_json::json!({"error": e.to_string()}),
	}
}

fn build_tool_list(state: &RegistryState, profile: Option<&ProfileDefinition>) -> Vec<McpToolSpec> {
	let mut out = Vec::with_capacity(state.tools.len());
	for (tool_id, executor) in &state.tools {
		let def = executor.tool();
		if let Some(profile) = profile {
			if !tool_matches_profile(def, profile) {
				continue;
			}
		}
		let mut spec = executor.mcp_tool();
		// Client-visible name is the tool id.
		spec.name = tool_id.clone();
		if let Some(service) = state.services.get(&def.service_id) {
			if !service.health.healthy {
				let reason = service.health.last_error.as_deref().unwrap_or("unknown");
				let decorated = format!(
					"{} [⚠ UNHEALTHY: {}]",
					spec.description.as_deref().unwrap_or_default(),
					reason
				);
				spec.description = Some(decorated.trim_start().to_string());
			}
		}
		out.push(spec);
	}
	out.sort_by(|a, b| a.name.cmp(&b.name));
	out
}
