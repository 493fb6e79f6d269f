// {{name}} templates
//
// Used for URL templates, input (body) templates, sub-process argument
// templates and result templates. Templates are compiled once at tool
// registration and rendered per call. Missing optional parameters expand to
// the empty string; missing required parameters fail the render. An
// empty-string value substitutes literally, so `/users/{{id}}` with an
// empty `id` yields `/users/` and a `//` produced this way is preserved.

mod transformer;

pub use transformer::{OutputFormat, OutputSpec, OutputTransformer, TextRule};

use std::collections::{HashMap, HashSet};

use crate::errors::GatewayError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
	Literal(String),
	Placeholder(String),
}

/// A compiled `{{name}}` template.
#[derive(Debug, Clone)]
pub struct Template {
	raw: String,
	segments: Vec<Segment>,
}

impl Template {
	/// Compile a template, validating marker syntax. An opening `{{` without
	/// a matching `}}`, or an empty marker, is a parse error.
	pub fn parse(raw: &str) -> Result<Self, String> {
		let mut segments = Vec::new();
		let mut rest = raw;
		while let Some(start) = rest.find("{{") {
			if start > 0 {
				segments.push(Segment::Literal(rest[..start].to_string()));
			}
			let after = &rest[start + 2..];
			let Some(end) = after.find("}}") else {
				return Err(format!("unterminated placeholder in {raw:?}"));
			};
			let name = after[..end].trim();
			if name.is_empty() {
				return Err(format!("empty placeholder in {raw:?}"));
			}
			segments.push(Segment::Placeholder(name.to_string()));
			rest = &after[end + 2..];
		}
		if !rest.is_empty() {
			segments.push(Segment::Literal(rest.to_string()));
		}
		Ok(Self {
			raw: raw.to_string(),
			segments,
		})
	}

	/// The source text the template was compiled from.
	pub fn raw(&self) -> &str {
		&self.raw
	}

	/// Names of all placeholders, in order of first appearance.
	pub fn placeholders(&self) -> Vec<&str> {
		let mut seen = HashSet::new();
		let mut out = Vec::new();
		for seg in &self.segments {
			if let Segment::Placeholder(name) = seg {
				if seen.insert(name.as_str()) {
					out.push(name.as_str());
				}
			}
		}
		out
	}

	pub fn has_placeholder(&self, name: &str) -> bool {
		self
			.segments
			.iter()
			.any(|s| matches!(s, Segment::Placeholder(n) if n == name))
	}

	/// Render with the given values. Placeholders listed in `required` must
	/// be present in `values`; all others expand to the empty string when
	/// absent.
	pub fn render(
		&self,
		values: &HashMap<String, String>,
		required: &HashSet<String>,
	) -> Result<String, GatewayError> {
		let mut out = String::with_capacity(self.raw.len());
		for seg in &self.segments {
			match seg {
				Segment::Literal(text) => out.push_str(text),
				Segment::Placeholder(name) => match values.get(name) {
					Some(v) => out.push_str(v),
					None if required.contains(name) => {
						return Err(GatewayError::MissingRequiredParameter(name.clone()));
					},
					None => {},
				},
			}
		}
		Ok(out)
	}
}
