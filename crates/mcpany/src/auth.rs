// Outbound request authentication
//
// Called before every outbound HTTP request (including OpenAPI, webhook
// delivery and WebRTC signalling) to inject credentials into the header
// map. Credential acquisition itself lives behind this trait.

use async_trait::async_trait;
use http::HeaderMap;

use crate::errors::GatewayError;

#[async_trait]
pub trait Authenticator: Send + Sync {
	async fn authenticate(&self, headers: &mut HeaderMap) -> Result<(), GatewayError>;
}

/// Authenticator that leaves requests untouched.
#[derive(Debug, Default, Clone)]
pub struct NoopAuthenticator;

#[async_trait]
impl Authenticator for NoopAuthenticator {
	async fn authenticate(&self, _headers: &mut HeaderMap) -> Result<(), GatewayError> {
		Ok(())
	}
}

/// Authenticator that sets a static bearer token.
pub struct BearerAuthenticator {
	header_value: String,
}

impl BearerAuthenticator {
	pub fn new(token: impl AsRef<str>) -> Self {
		Self {
			header_value: format!("Bearer {}", token.as_ref()),
		}
	}
}

#[async_trait]
impl Authenticator for BearerAuthenticator {
	async fn authenticate(&self, headers: &mut HeaderMap) -> Result<(), GatewayError> {
		let value = http::HeaderValue::from_str(&self.header_value)
			.map_err(|e| GatewayError::Internal(format!("invalid auth header: {e}")))?;
		headers.insert(http::header::AUTHORIZATION, value);
		Ok(())
	}
}
