// Secret references and resolution
//
// Tool descriptors never hold secret material, only opaque references that
// are resolved just-in-time by the configured resolver. The environment
// resolver is the default; external stores plug in behind the trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::GatewayError;

/// An opaque reference to secret material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SecretRef {
	/// Resolve from a process environment variable.
	Env { name: String },
	/// Inline plain-text value (configuration-supplied).
	Plain { value: String },
	/// Key in an external secret store.
	Store { key: String },
}

#[async_trait]
pub trait SecretResolver: Send + Sync {
	async fn resolve(&self, secret: &SecretRef) -> Result<String, GatewayError>;
}

/// Resolver backed by the process environment. `Store` references require
/// an external resolver and fail here.
#[derive(Debug, Default, Clone)]
pub struct EnvSecretResolver;

#[async_trait]
impl SecretResolver for EnvSecretResolver {
	async fn resolve(&self, secret: &SecretRef) -> Result<String, GatewayError> {
		match secret {
			SecretRef::Env { name } => std::env::var(name).map_err(|_| {
				GatewayError::SecretResolve(format!("environment variable {name:?} is not set"))
			}),
			SecretRef::Plain { value } => Ok(value.clone()),
			SecretRef::Store { key } => Err(GatewayError::SecretResolve(format!(
				"no secret store configured for key {key:?}"
			))),
		}
	}
}
