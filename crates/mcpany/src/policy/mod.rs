// Policy engine
//
// Rule lists are compiled once at service registration and evaluated per
// invocation against the tool name and the raw argument bytes. Evaluation
// is linear first-match. An invalid regex never fails registration: the
// rule is logged once and treated as non-matching.

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyAction {
	Allow,
	Deny,
	SaveCache,
	DeleteCache,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
	/// Regex over the client-facing tool name; absent matches every tool.
	#[serde(default)]
	pub name_regex: Option<String>,

	/// Regex over the raw argument bytes; absent matches any arguments.
	#[serde(default)]
	pub argument_regex: Option<String>,

	pub action: PolicyAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySpec {
	#[serde(default)]
	pub rules: Vec<PolicyRule>,

	#[serde(default = "default_action")]
	pub default_action: PolicyAction,
}

fn default_action() -> PolicyAction {
	PolicyAction::Allow
}

impl Default for PolicySpec {
	fn default() -> Self {
		Self {
			rules: Vec::new(),
			default_action: default_action(),
		}
	}
}

/// The outcome of evaluating a policy against one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
	/// A rule matched and produced this action.
	Matched(PolicyAction),
	/// No rule matched; this is the default action.
	Default(PolicyAction),
}

impl PolicyDecision {
	pub fn action(&self) -> PolicyAction {
		match self {
			Self::Matched(a) | Self::Default(a) => *a,
		}
	}
}

struct CompiledRule {
	name: Option<regex::Regex>,
	arguments: Option<regex::bytes::Regex>,
	action: PolicyAction,
}

/// A policy compiled for evaluation. Rules whose regexes failed to compile
/// are dropped (logged at compile time) and therefore never match.
pub struct CompiledPolicy {
	rules: Vec<CompiledRule>,
	default_action: PolicyAction,
}

impl CompiledPolicy {
	pub fn compile(spec: &PolicySpec) -> Self {
		let mut rules = Vec::with_capacity(spec.rules.len());
		for (idx, rule) in spec.rules.iter().enumerate() {
			let name = match rule.name_regex.as_deref().map(regex::Regex::new) {
				None => None,
				Some(Ok(re)) => Some(re),
				Some(Err(e)) => {
					warn!(target: "gateway", rule = idx, error = %e, "invalid policy name regex; rule will not match");
					continue;
				},
			};
			let arguments = match rule.argument_regex.as_deref().map(regex::bytes::Regex::new) {
				None => None,
				Some(Ok(re)) => Some(re),
				Some(Err(e)) => {
					warn!(target: "gateway", rule = idx, error = %e, "invalid policy argument regex; rule will not match");
					continue;
				},
			};
			rules.push(CompiledRule {
				name,
				arguments,
				action: rule.action,
			});
		}
		Self {
			rules,
			default_action: spec.default_action,
		}
	}

	pub fn default_action(&self) -> PolicyAction {
		self.default_action
	}

	/// First-match evaluation against the tool name and raw argument bytes.
	pub fn evaluate(&self, tool_name: &str, raw_arguments: &[u8]) -> PolicyDecision {
		for rule in &self.rules {
			let name_matches = rule
				.name
				.as_ref()
				.map(|re| re.is_match(tool_name))
				.unwrap_or(true);
			if !name_matches {
				continue;
			}
			let args_match = rule
				.arguments
				.as_ref()
				.map(|re| re.is_match(raw_arguments))
				.unwrap_or(true);
			if !args_match {
				continue;
			}
			return PolicyDecision::Matched(rule.action);
		}
		PolicyDecision::Default(self.default_action)
	}
}
