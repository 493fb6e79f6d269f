// Environment-driven runtime switches
//
// All knobs are read lazily so tests can flip them per-case. Malformed
// values fall back to the default and are logged once per process.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::warn;

/// Unmask upstream error bodies in returned errors.
pub const ENV_DEBUG: &str = "MCPANY_DEBUG";
/// Allow outbound requests to private/link-local addresses.
pub const ENV_ALLOW_LOCAL_IPS: &str = "MCPANY_DANGEROUS_ALLOW_LOCAL_IPS";
/// Allow outbound requests to loopback addresses.
pub const ENV_ALLOW_LOOPBACK: &str = "MCPANY_ALLOW_LOOPBACK_RESOURCES";
/// Byte cap on captured sub-process stdout/stderr.
pub const ENV_MAX_COMMAND_OUTPUT: &str = "MCPANY_MAX_COMMAND_OUTPUT_SIZE";
/// Byte cap on upstream response bodies.
pub const ENV_MAX_RESPONSE_BODY: &str = "MCPANY_MAX_RESPONSE_BODY_SIZE";
/// Disable STUN servers when preparing WebRTC peers (tests).
pub const ENV_WEBRTC_DISABLE_STUN: &str = "MCPANY_WEBRTC_DISABLE_STUN";

pub const DEFAULT_MAX_COMMAND_OUTPUT: usize = 1024 * 1024;
pub const DEFAULT_MAX_RESPONSE_BODY: usize = 10 * 1024 * 1024;

static WARNED: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

fn warn_once(name: &str, raw: &str) {
	let mut seen = WARNED.lock();
	if seen.insert(name.to_string()) {
		warn!(target: "gateway", var = name, value = raw, "ignoring malformed environment value");
	}
}

pub fn bool_env(name: &str) -> bool {
	match std::env::var(name) {
		Ok(v) => match v.trim().to_ascii_lowercase().as_str() {
			"1" | "true" | "yes" | "on" => true,
			"" | "0" | "false" | "no" | "off" => false,
			_ => {
				warn_once(name, &v);
				false
			},
		},
		Err(_) => false,
	}
}

pub fn size_env(name: &str, default: usize) -> usize {
	match std::env::var(name) {
		Ok(v) => match v.trim().parse::<usize>() {
			Ok(n) if n > 0 => n,
			_ => {
				warn_once(name, &v);
				default
			},
		},
		Err(_) => default,
	}
}

pub fn debug_enabled() -> bool {
	bool_env(ENV_DEBUG)
}

pub fn allow_local_ips() -> bool {
	bool_env(ENV_ALLOW_LOCAL_IPS)
}

pub fn allow_loopback() -> bool {
	bool_env(ENV_ALLOW_LOOPBACK)
}

pub fn max_command_output_size() -> usize {
	size_env(ENV_MAX_COMMAND_OUTPUT, DEFAULT_MAX_COMMAND_OUTPUT)
}

pub fn max_response_body_size() -> usize {
	size_env(ENV_MAX_RESPONSE_BODY, DEFAULT_MAX_RESPONSE_BODY)
}

pub fn webrtc_stun_disabled() -> bool {
	bool_env(ENV_WEBRTC_DISABLE_STUN)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_bool_env_variants() {
		std::env::set_var("MCPANY_TEST_BOOL", "true");
		assert!(bool_env("MCPANY_TEST_BOOL"));
		std::env::set_var("MCPANY_TEST_BOOL", "0");
		assert!(!bool_env("MCPANY_TEST_BOOL"));
		std::env::remove_var("MCPANY_TEST_BOOL");
		assert!(!bool_env("MCPANY_TEST_BOOL"));
	}

	#[test]
	fn test_size_env_fallback() {
		std::env::set_var("MCPANY_TEST_SIZE", "not-a-number");
		assert_eq!(size_env("MCPANY_TEST_SIZE", 42), 42);
		std::env::set_var("MCPANY_TEST_SIZE", "1024");
		assert_eq!(size_env("MCPANY_TEST_SIZE", 42), 1024);
		std::env::remove_var("MCPANY_TEST_SIZE");
	}

	#[test]
	fn test_defaults() {
		assert_eq!(DEFAULT_MAX_COMMAND_OUTPUT, 1 << 20);
		assert_eq!(DEFAULT_MAX_RESPONSE_BODY, 10 << 20);
	}
}
