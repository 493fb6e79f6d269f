// Parameter escaping
//
// Parameters default to escaped insertion: URL-encoded into path/query
// positions and JSON-encoded into body templates. A mapping may opt out
// with `disable_escape`, in which case the value is inserted verbatim but
// still screened for characters that would change the meaning of the
// surrounding position.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::errors::GatewayError;

// Percent-encode everything outside the RFC 3986 unreserved set.
const URL_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
	.remove(b'-')
	.remove(b'_')
	.remove(b'.')
	.remove(b'~');

/// URL-encode a value for substitution into a path segment or query value.
pub fn url_encode(value: &str) -> String {
	utf8_percent_encode(value, URL_COMPONENT).to_string()
}

/// JSON-encode a value for substitution into a body template. The result is
/// the escaped string content without the surrounding quotes, so templates
/// control their own quoting (`"{{name}}"`).
pub fn json_encode(value: &str) -> String {
	let quoted = serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string());
	quoted[1..quoted.len() - 1].to_string()
}

/// Screen applied to a value inserted with `disable_escape`: characters that
/// would re-shape the URL or smuggle extra parameters are rejected.
pub fn check_unescaped_value(name: &str, value: &str) -> Result<(), GatewayError> {
	let forbidden = value
		.chars()
		.any(|c| matches!(c, '?' | '&' | '#' | '=') || c.is_whitespace())
		|| value.contains("..");
	if forbidden {
		return Err(GatewayError::ForbiddenCharacters(name.to_string()));
	}
	Ok(())
}
