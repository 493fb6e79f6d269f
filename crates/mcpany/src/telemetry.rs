// Logging setup
//
// Structured key/value logs via `tracing`. Installation is idempotent so
// tests can call it freely; the filter comes from RUST_LOG.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Install the global subscriber once. Later calls are no-ops, which is
/// the deterministic reset behaviour tests rely on.
pub fn try_init() {
	INIT.call_once(|| {
		let _ = tracing_subscriber::fmt()
			.with_env_filter(EnvFilter::from_default_env())
			.with_target(true)
			.try_init();
	});
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_init_is_idempotent() {
		try_init();
		try_init();
		tracing::debug!(target: "gateway", "still alive after double init");
	}
}
