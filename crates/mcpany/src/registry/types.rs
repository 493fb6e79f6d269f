// Tool descriptor types
//
// A tool is a named, schemaed unit of work bound to one transport and one
// upstream service. The descriptor carries the declarative parts shared by
// every transport; transport-specific wiring (method descriptors, commands,
// external clients) lives on the concrete adapter that owns the descriptor.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::secret::SecretRef;
use crate::template::OutputSpec;

/// Capability annotations surfaced to MCP clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolAnnotations {
	#[serde(default)]
	pub read_only: bool,
	#[serde(default)]
	pub destructive: bool,
	#[serde(default)]
	pub idempotent: bool,
	#[serde(default)]
	pub open_world: bool,
}

/// Where a parameter is placed in the wire request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamLocation {
	Path,
	Query,
	Header,
	#[default]
	Body,
	/// Sub-process argv substitution.
	Arg,
	/// Sub-process environment variable.
	Env,
	/// Sub-process standard input.
	Stdin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamSchema {
	pub name: String,
	#[serde(default)]
	pub required: bool,
	#[serde(default)]
	pub description: Option<String>,
}

/// Binding of one named parameter to a request position, with optional
/// secret backing. Secret-backed values never appear in the descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamMapping {
	pub schema: ParamSchema,

	#[serde(rename = "in", default)]
	pub location: ParamLocation,

	#[serde(default)]
	pub secret: Option<SecretRef>,

	/// Insert the value verbatim instead of URL/JSON encoding it. The
	/// forbidden-character screen still applies.
	#[serde(default)]
	pub disable_escape: bool,
}

impl ParamMapping {
	pub fn new(name: impl Into<String>, location: ParamLocation) -> Self {
		Self {
			schema: ParamSchema {
				name: name.into(),
				required: false,
				description: None,
			},
			location,
			secret: None,
			disable_escape: false,
		}
	}

	pub fn required(mut self) -> Self {
		self.schema.required = true;
		self
	}

	pub fn with_secret(mut self, secret: SecretRef) -> Self {
		self.secret = Some(secret);
		self
	}

	pub fn with_disable_escape(mut self) -> Self {
		self.disable_escape = true;
		self
	}

	pub fn name(&self) -> &str {
		&self.schema.name
	}

	pub fn is_secret(&self) -> bool {
		self.secret.is_some()
	}
}

/// Declarative tool descriptor.
#[derive(Debug, Clone)]
pub struct ToolDef {
	/// Registrar-supplied name; sanitized by the registry at registration.
	pub name: String,

	/// Owning service; must be non-empty.
	pub service_id: String,

	pub description: Option<String>,

	/// Fully-qualified method: `<VERB> <URL>` for HTTP/OpenAPI,
	/// `pkg.Service.Method` for gRPC, `WEBRTC <url>` for WebRTC.
	pub method_fqn: String,

	pub input_schema: Option<Value>,
	pub output_schema: Option<Value>,
	pub annotations: ToolAnnotations,
	pub tags: Vec<String>,

	/// Profiles this tool explicitly belongs to.
	pub profiles: Vec<String>,

	pub parameters: Vec<ParamMapping>,

	/// Body template for the outbound request, when declared.
	pub input_template: Option<String>,

	/// Response shaping.
	pub output: Option<OutputSpec>,
}

impl ToolDef {
	pub fn new(
		name: impl Into<String>,
		service_id: impl Into<String>,
		method_fqn: impl Into<String>,
	) -> Self {
		Self {
			name: name.into(),
			service_id: service_id.into(),
			description: None,
			method_fqn: method_fqn.into(),
			input_schema: None,
			output_schema: None,
			annotations: ToolAnnotations::default(),
			tags: Vec::new(),
			profiles: Vec::new(),
			parameters: Vec::new(),
			input_template: None,
			output: None,
		}
	}

	pub fn with_description(mut self, desc: impl Into<String>) -> Self {
		self.description = Some(desc.into());
		self
	}

	pub fn with_parameter(mut self, mapping: ParamMapping) -> Self {
		self.parameters.push(mapping);
		self
	}

	pub fn with_input_template(mut self, template: impl Into<String>) -> Self {
		self.input_template = Some(template.into());
		self
	}

	pub fn with_output(mut self, output: OutputSpec) -> Self {
		self.output = Some(output);
		self
	}

	pub fn with_tags(mut self, tags: Vec<String>) -> Self {
		self.tags = tags;
		self
	}

	pub fn with_profiles(mut self, profiles: Vec<String>) -> Self {
		self.profiles = profiles;
		self
	}

	pub fn with_annotations(mut self, annotations: ToolAnnotations) -> Self {
		self.annotations = annotations;
		self
	}

	pub fn with_input_schema(mut self, schema: Value) -> Self {
		self.input_schema = Some(schema);
		self
	}

	pub fn with_output_schema(mut self, schema: Value) -> Self {
		self.output_schema = Some(schema);
		self
	}

	pub fn parameter(&self, name: &str) -> Option<&ParamMapping> {
		self.parameters.iter().find(|p| p.name() == name)
	}

	/// Capability annotation lookup by external (camelCase) name, used by
	/// profile property selectors.
	pub fn property(&self, name: &str) -> Option<bool> {
		match name {
			"readOnly" => Some(self.annotations.read_only),
			"destructive" => Some(self.annotations.destructive),
			"idempotent" => Some(self.annotations.idempotent),
			"openWorld" => Some(self.annotations.open_world),
			_ => None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_builder() {
		let def = ToolDef::new("get_user", "users", "GET http://srv/users/{{id}}")
			.with_description("Fetch a user")
			.with_parameter(ParamMapping::new("id", ParamLocation::Path).required())
			.with_tags(vec!["crm".into()]);
		assert_eq!(def.name, "get_user");
		assert_eq!(def.service_id, "users");
		assert!(def.parameter("id").unwrap().schema.required);
		assert!(def.parameter("absent").is_none());
	}

	#[test]
	fn test_param_location_serde() {
		let mapping = ParamMapping::new("q", ParamLocation::Query);
		let json = serde_json::to_value(&mapping).unwrap();
		assert_eq!(json["in"], "query");
		let back: ParamMapping = serde_json::from_value(json).unwrap();
		assert_eq!(back.location, ParamLocation::Query);
	}

	#[test]
	fn test_default_location_is_body() {
		let mapping: ParamMapping =
			serde_json::from_value(serde_json::json!({"schema": {"name": "x"}})).unwrap();
		assert_eq!(mapping.location, ParamLocation::Body);
	}

	#[test]
	fn test_property_lookup() {
		let def = ToolDef::new("t", "s", "GET http://x").with_annotations(ToolAnnotations {
			read_only: true,
			..Default::default()
		});
		assert_eq!(def.property("readOnly"), Some(true));
		assert_eq!(def.property("destructive"), Some(false));
		assert_eq!(def.property("unknown"), None);
	}
}
