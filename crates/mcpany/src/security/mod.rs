// Security validators shared by every transport adapter
//
// Pure functions over user-controlled strings: path traversal, URL safety,
// shell/interpreter injection, parameter escaping, and secret redaction.
// Adapters apply the relevant subset before any wire request is built.

mod escape;
mod path;
mod redact;
mod shell;
mod url;

pub use escape::{check_unescaped_value, json_encode, url_encode};
pub use path::check_path_traversal;
pub use redact::{
	redact_dsn, redact_url, sanitize_upstream_error, truncate_error, ERROR_TRUNCATE_BYTES,
	REDACTED,
};
pub use shell::{
	check_argument_assignment, check_interpreter_injection, check_shell_injection,
	is_network_tool, is_shell_like, quote_context_at, QuoteContext,
};
pub use url::{
	is_safe_url, reset_safe_url_validator, set_safe_url_validator, SafeUrlValidator,
};

use crate::errors::GatewayError;

/// Reject values carrying a `file:` scheme; local file reads must never be
/// reachable through substituted parameters.
pub fn check_no_file_scheme(value: &str) -> Result<(), GatewayError> {
	if value.trim_start().to_ascii_lowercase().starts_with("file:") {
		return Err(GatewayError::FileScheme);
	}
	Ok(())
}
