// Output transformers
//
// Shape an upstream response body into the value returned to the caller.
// Formats: JSON (default, parse the body), RAW_BYTES (base64 payload under
// a `raw` key), TEXT (regex extraction rules over the body text). A
// jq-style extraction map and a result template can further reshape the
// parsed value; both are compiled once at registration.

use std::collections::HashMap;

use base64::Engine;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::Template;
use crate::errors::GatewayError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutputFormat {
	#[default]
	Json,
	RawBytes,
	Text,
}

/// A TEXT extraction rule: the first capture group (or the whole match) of
/// `pattern` becomes the value of `field`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextRule {
	pub field: String,
	pub pattern: String,
}

/// Declarative output shaping attached to a tool definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputSpec {
	#[serde(default)]
	pub format: OutputFormat,

	/// TEXT-format extraction rules.
	#[serde(default)]
	pub rules: Vec<TextRule>,

	/// jq-style dot paths: result field name -> path into the parsed value.
	#[serde(default)]
	pub extract: Option<HashMap<String, String>>,

	/// Result template rendered over the (possibly extracted) object; the
	/// rendered string becomes the result.
	#[serde(default)]
	pub template: Option<String>,
}

/// Compiled form of [`OutputSpec`].
#[derive(Debug, Clone)]
pub struct OutputTransformer {
	format: OutputFormat,
	rules: Vec<(String, Regex)>,
	extract: Option<HashMap<String, String>>,
	template: Option<Template>,
}

impl Default for OutputTransformer {
	fn default() -> Self {
		Self::compile(&OutputSpec::default()).expect("default output spec compiles")
	}
}

impl OutputTransformer {
	pub fn compile(spec: &OutputSpec) -> Result<Self, GatewayError> {
		let mut rules = Vec::with_capacity(spec.rules.len());
		for rule in &spec.rules {
			let re = Regex::new(&rule.pattern)
				.map_err(|e| GatewayError::OutputTemplateParse(e.to_string()))?;
			rules.push((rule.field.clone(), re));
		}
		let template = spec
			.template
			.as_deref()
			.map(Template::parse)
			.transpose()
			.map_err(GatewayError::OutputTemplateParse)?;
		Ok(Self {
			format: spec.format,
			rules,
			extract: spec.extract.clone(),
			template,
		})
	}

	/// Shape a response body.
	pub fn apply(&self, body: &[u8]) -> Result<Value, GatewayError> {
		let mut value = match self.format {
			OutputFormat::RawBytes => {
				return Ok(json!({
					"raw": base64::engine::general_purpose::STANDARD.encode(body),
				}));
			},
			OutputFormat::Json => {
				let text = String::from_utf8_lossy(body);
				match serde_json::from_str::<Value>(&text) {
					Ok(v) => v,
					// Non-JSON upstreams surface as plain text.
					Err(_) => Value::String(text.into_owned()),
				}
			},
			OutputFormat::Text => {
				let text = String::from_utf8_lossy(body);
				if self.rules.is_empty() {
					Value::String(text.into_owned())
				} else {
					let mut out = Map::new();
					for (field, re) in &self.rules {
						let extracted = re.captures(&text).map(|caps| {
							caps
								.get(1)
								.unwrap_or_else(|| caps.get(0).expect("capture 0 always present"))
								.as_str()
								.to_string()
						});
						out.insert(
							field.clone(),
							extracted.map(Value::String).unwrap_or(Value::Null),
						);
					}
					Value::Object(out)
				}
			},
		};

		if let Some(extract) = &self.extract {
			let mut out = Map::new();
			for (field, path) in extract {
				out.insert(
					field.clone(),
					lookup_path(&value, path).cloned().unwrap_or(Value::Null),
				);
			}
			value = Value::Object(out);
		}

		if let Some(template) = &self.template {
			let values = flatten_for_template(&value);
			let rendered = template
				.render(&values, &Default::default())
				.map_err(|e| GatewayError::OutputTemplateParse(e.to_string()))?;
			value = Value::String(rendered);
		}

		Ok(value)
	}
}

/// Walk a dot path (`.user.name`, `items.0.id`, optionally `$.`-prefixed)
/// into a JSON value.
fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
	let trimmed = path
		.trim_start_matches('$')
		.trim_start_matches('.')
		.trim();
	if trimmed.is_empty() {
		return Some(value);
	}
	let mut current = value;
	for part in trimmed.split('.') {
		current = match current {
			Value::Object(map) => map.get(part)?,
			Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
			_ => return None,
		};
	}
	Some(current)
}

fn flatten_for_template(value: &Value) -> HashMap<String, String> {
	let mut out = HashMap::new();
	if let Value::Object(map) = value {
		for (k, v) in map {
			out.insert(k.clone(), value_to_template_string(v));
		}
	}
	out
}

fn value_to_template_string(value: &Value) -> String {
	match value {
		Value::String(s) => s.clone(),
		Value::Null => String::new(),
		other => other.to_string(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_default_json_parse() {
		let t = OutputTransformer::default();
		let out = t.apply(br#"{"id":"123","name":"test"}"#).unwrap();
		assert_eq!(out, json!({"id": "123", "name": "test"}));
	}

	#[test]
	fn test_json_fallback_to_text() {
		let t = OutputTransformer::default();
		let out = t.apply(b"plain text response").unwrap();
		assert_eq!(out, json!("plain text response"));
	}

	#[test]
	fn test_raw_bytes() {
		let spec = OutputSpec {
			format: OutputFormat::RawBytes,
			..Default::default()
		};
		let t = OutputTransformer::compile(&spec).unwrap();
		let out = t.apply(&[0xde, 0xad, 0xbe, 0xef]).unwrap();
		assert_eq!(out, json!({"raw": "3q2+7w=="}));
	}

	#[test]
	fn test_text_rules() {
		let spec = OutputSpec {
			format: OutputFormat::Text,
			rules: vec![
				TextRule {
					field: "version".into(),
					pattern: r"version: (\S+)".into(),
				},
				TextRule {
					field: "missing".into(),
					pattern: r"nope: (\S+)".into(),
				},
			],
			..Default::default()
		};
		let t = OutputTransformer::compile(&spec).unwrap();
		let out = t.apply(b"build ok\nversion: 1.4.2\n").unwrap();
		assert_eq!(out, json!({"version": "1.4.2", "missing": null}));
	}

	#[test]
	fn test_extraction_map() {
		let spec = OutputSpec {
			extract: Some(HashMap::from([
				("title".to_string(), "$.result.title".to_string()),
				("first".to_string(), "items.0".to_string()),
			])),
			..Default::default()
		};
		let t = OutputTransformer::compile(&spec).unwrap();
		let out = t
			.apply(br#"{"result":{"title":"hi"},"items":[7,8]}"#)
			.unwrap();
		assert_eq!(out, json!({"title": "hi", "first": 7}));
	}

	#[test]
	fn test_result_template() {
		let spec = OutputSpec {
			template: Some("{{name}} <{{email}}>".to_string()),
			..Default::default()
		};
		let t = OutputTransformer::compile(&spec).unwrap();
		let out = t.apply(br#"{"name":"Ada","email":"ada@example.com"}"#).unwrap();
		assert_eq!(out, json!("Ada <ada@example.com>"));
	}

	#[test]
	fn test_invalid_rule_pattern_fails_compile() {
		let spec = OutputSpec {
			format: OutputFormat::Text,
			rules: vec![TextRule {
				field: "x".into(),
				pattern: "(unclosed".into(),
			}],
			..Default::default()
		};
		assert!(matches!(
			OutputTransformer::compile(&spec),
			Err(GatewayError::OutputTemplateParse(_))
		));
	}

	#[test]
	fn test_invalid_template_fails_compile() {
		let spec = OutputSpec {
			template: Some("{{broken".to_string()),
			..Default::default()
		};
		assert!(matches!(
			OutputTransformer::compile(&spec),
			Err(GatewayError::OutputTemplateParse(_))
		));
	}
}
