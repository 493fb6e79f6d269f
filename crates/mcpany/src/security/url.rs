// Outbound URL safety (SSRF guard)
//
// Every outbound HTTP/OpenAPI URL, and any URL handed to a network tool on
// the sub-process path, is screened through the process-wide validator. The
// validator is swappable so tests can inject their own; the default blocks
// unspecified, loopback, link-local and private addresses unless the
// corresponding environment override is set.

use std::net::{IpAddr, ToSocketAddrs};
use std::sync::Arc;

use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use tracing::debug;

use crate::config;
use crate::errors::GatewayError;

/// Validator signature: `Ok(())` when the URL may be fetched, otherwise a
/// short human-readable reason.
pub type SafeUrlValidator = Arc<dyn Fn(&str) -> Result<(), String> + Send + Sync>;

struct ValidatorCell(SafeUrlValidator);

static VALIDATOR: Lazy<ArcSwap<ValidatorCell>> =
	Lazy::new(|| ArcSwap::from_pointee(ValidatorCell(Arc::new(default_is_safe_url))));

/// Replace the process-wide validator (tests).
pub fn set_safe_url_validator(validator: SafeUrlValidator) {
	VALIDATOR.store(Arc::new(ValidatorCell(validator)));
}

/// Restore the default validator (tests).
pub fn reset_safe_url_validator() {
	VALIDATOR.store(Arc::new(ValidatorCell(Arc::new(default_is_safe_url))));
}

/// Screen a URL through the current validator.
pub fn is_safe_url(url: &str) -> Result<(), GatewayError> {
	let cell = VALIDATOR.load();
	(cell.0.as_ref())(url).map_err(|reason| {
		debug!(target: "gateway", url, reason, "url rejected by safety validator");
		GatewayError::UnsafeUrl(url.to_string())
	})
}

fn default_is_safe_url(url_str: &str) -> Result<(), String> {
	let allow_local = config::allow_local_ips();
	let allow_loopback = allow_local || config::allow_loopback();
	screen_url(url_str, allow_local, allow_loopback)
}

fn screen_url(url_str: &str, allow_local: bool, allow_loopback: bool) -> Result<(), String> {
	let parsed = url::Url::parse(url_str).map_err(|e| format!("invalid url: {e}"))?;

	if !matches!(parsed.scheme(), "http" | "https" | "ws" | "wss") {
		return Err(format!("scheme {:?} is not allowed", parsed.scheme()));
	}

	let host = parsed.host().ok_or_else(|| "url has no host".to_string())?;

	match host {
		url::Host::Ipv4(v4) => check_ip_allowed(IpAddr::V4(v4), allow_local, allow_loopback),
		url::Host::Ipv6(v6) => check_ip_allowed(IpAddr::V6(v6), allow_local, allow_loopback),
		url::Host::Domain(domain) => {
			// Resolve and screen the actual addresses. Resolution failure is
			// allowed through; the fetch itself will fail with a clearer error.
			match (domain, 80u16).to_socket_addrs() {
				Ok(addrs) => {
					for addr in addrs {
						check_ip_allowed(addr.ip(), allow_local, allow_loopback)?;
					}
					Ok(())
				},
				Err(_) => Ok(()),
			}
		},
	}
}

fn check_ip_allowed(ip: IpAddr, allow_local: bool, allow_loopback: bool) -> Result<(), String> {
	match ip {
		IpAddr::V4(v4) => {
			if v4.is_loopback() {
				if !allow_loopback {
					return Err(format!("loopback address {v4} is not allowed"));
				}
				return Ok(());
			}
			if v4.is_unspecified() || v4.octets()[0] == 0 {
				return Err(format!("unspecified address {v4} is not allowed"));
			}
			if (v4.is_private() || v4.is_link_local() || v4.is_broadcast()) && !allow_local {
				return Err(format!("private address {v4} is not allowed"));
			}
			Ok(())
		},
		IpAddr::V6(v6) => {
			if v6.is_loopback() {
				if !allow_loopback {
					return Err(format!("loopback address {v6} is not allowed"));
				}
				return Ok(());
			}
			if v6.is_unspecified() {
				return Err(format!("unspecified address {v6} is not allowed"));
			}
			if let Some(v4) = v6.to_ipv4_mapped() {
				return check_ip_allowed(IpAddr::V4(v4), allow_local, allow_loopback);
			}
			let segments = v6.segments();
			// fe80::/10 link-local, fc00::/7 unique local
			if (segments[0] & 0xffc0 == 0xfe80 || segments[0] & 0xfe00 == 0xfc00) && !allow_local {
				return Err(format!("private address {v6} is not allowed"));
			}
			Ok(())
		},
	}
}
