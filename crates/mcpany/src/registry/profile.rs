// Profiles
//
// A profile is a named, shareable filter over the tool catalogue. A tool
// matches a profile iff it lists the profile explicitly, or its service is
// enabled in the profile and the selector (when non-trivial) matches, or
// the selector alone is non-trivial and matches. With no enabled profiles
// every tool is visible.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::types::ToolDef;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSelector {
	/// Tool tags; a single shared tag is a match.
	#[serde(default)]
	pub tags: Vec<String>,

	/// Capability properties (`readOnly`, `destructive`, `idempotent`,
	/// `openWorld`) that must hold on the tool.
	#[serde(default)]
	pub tool_properties: HashMap<String, bool>,
}

impl ProfileSelector {
	/// A selector with no criteria. Trivial selectors never match on their
	/// own; they only widen an explicitly-enabled service.
	pub fn is_trivial(&self) -> bool {
		self.tags.is_empty() && self.tool_properties.is_empty()
	}

	pub fn matches(&self, tool: &ToolDef) -> bool {
		let tag_hit = self.tags.iter().any(|t| tool.tags.contains(t));
		let property_hit = self
			.tool_properties
			.iter()
			.any(|(name, expected)| tool.property(name) == Some(*expected));
		tag_hit || property_hit
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileServiceConfig {
	#[serde(default)]
	pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileDefinition {
	pub name: String,

	#[serde(default)]
	pub selector: ProfileSelector,

	#[serde(default)]
	pub service_config: HashMap<String, ProfileServiceConfig>,
}

impl ProfileDefinition {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			selector: ProfileSelector::default(),
			service_config: HashMap::new(),
		}
	}

	pub fn with_enabled_service(mut self, service_id: impl Into<String>) -> Self {
		self
			.service_config
			.insert(service_id.into(), ProfileServiceConfig { enabled: true });
		self
	}

	pub fn with_selector(mut self, selector: ProfileSelector) -> Self {
		self.selector = selector;
		self
	}
}

/// The visibility rule. A service with no `service_config` entry is not
/// enabled; such tools are only reachable through a non-trivial selector
/// or an explicit profile listing.
pub fn tool_matches_profile(tool: &ToolDef, profile: &ProfileDefinition) -> bool {
	if tool.profiles.contains(&profile.name) {
		return true;
	}
	let service_enabled = profile
		.service_config
		.get(&tool.service_id)
		.map(|c| c.enabled)
		.unwrap_or(false);
	if service_enabled && (profile.selector.is_trivial() || profile.selector.matches(tool)) {
		return true;
	}
	!profile.selector.is_trivial() && profile.selector.matches(tool)
}
