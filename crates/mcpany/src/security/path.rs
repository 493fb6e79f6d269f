// Path traversal detection
//
// Applied to every path parameter and sub-process argument before the value
// reaches a URL template or argv. The check is strict: any `..` segment is
// rejected pre-normalisation, including patterns like `foo/../bar` that a
// normaliser would collapse to a safe path.

use percent_encoding::percent_decode_str;

use crate::errors::GatewayError;

fn has_dotdot_segment(value: &str) -> bool {
	value.split('/').any(|seg| seg == "..")
}

// Raw-bytes screen for encoded dots forming a traversal pair. Matching is
// case-insensitive and covers mixed single-encoded forms (`.%2e`, `%2E.`).
fn has_encoded_dotdot(value: &str) -> bool {
	let lower = value.to_ascii_lowercase();
	lower.contains("%2e%2e") || lower.contains(".%2e") || lower.contains("%2e.")
}

fn screen(value: &str) -> Result<(), GatewayError> {
	if value.contains('\\') {
		return Err(GatewayError::PathTraversal);
	}
	if has_dotdot_segment(value) || has_encoded_dotdot(value) {
		return Err(GatewayError::PathTraversal);
	}
	Ok(())
}

/// Reject values that could escape the path position they are substituted
/// into. Percent-encodings are decoded exactly once before re-screening, so
/// double-encoded traversal (`%252e%252e`) is caught by the raw-bytes check
/// on the decoded form.
pub fn check_path_traversal(value: &str) -> Result<(), GatewayError> {
	screen(value)?;
	let decoded = percent_decode_str(value).decode_utf8_lossy();
	screen(&decoded)
}

#[cfg(test)]
mod tests {
	use super::*;
	use assert_matches::assert_matches;

	#[test]
	fn test_plain_values_pass() {
		assert!(check_path_traversal("123").is_ok());
		assert!(check_path_traversal("user-name_1.json").is_ok());
		assert!(check_path_traversal("a/b/c").is_ok());
		// Dots that are not a full segment are fine.
		assert!(check_path_traversal("..hidden").is_ok());
		assert!(check_path_traversal("archive.tar.gz").is_ok());
		assert!(check_path_traversal("").is_ok());
	}

	#[test]
	fn test_literal_traversal_rejected() {
		assert_matches!(
			check_path_traversal("../admin"),
			Err(GatewayError::PathTraversal)
		);
		assert_matches!(check_path_traversal(".."), Err(GatewayError::PathTraversal));
		// Strict mode: rejected even though it normalises to "bar".
		assert_matches!(
			check_path_traversal("foo/../bar"),
			Err(GatewayError::PathTraversal)
		);
		assert_matches!(
			check_path_traversal("a/b/.."),
			Err(GatewayError::PathTraversal)
		);
	}

	#[test]
	fn test_backslash_rejected() {
		assert_matches!(
			check_path_traversal("..\\admin"),
			Err(GatewayError::PathTraversal)
		);
		assert_matches!(
			check_path_traversal("c:\\windows"),
			Err(GatewayError::PathTraversal)
		);
	}

	#[test]
	fn test_percent_encoded_traversal_rejected() {
		for v in [
			"%2e%2e/admin",
			"%2E%2e/admin",
			".%2e/admin",
			"%2E./admin",
			"%2e%2E%2f",
		] {
			assert_matches!(check_path_traversal(v), Err(GatewayError::PathTraversal), "{v}");
		}
	}

	#[test]
	fn test_double_encoded_traversal_rejected() {
		// One decode reveals %2e%2e, which the raw-bytes screen catches.
		assert_matches!(
			check_path_traversal("%252e%252e/admin"),
			Err(GatewayError::PathTraversal)
		);
		assert_matches!(
			check_path_traversal("%252E%252e"),
			Err(GatewayError::PathTraversal)
		);
	}

	#[test]
	fn test_decoded_segment_rejected() {
		// %2F decodes to a slash, exposing a ".." segment.
		assert_matches!(
			check_path_traversal("..%2fadmin"),
			Err(GatewayError::PathTraversal)
		);
	}
}
