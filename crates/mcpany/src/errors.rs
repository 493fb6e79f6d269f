// Gateway error types
//
// The message strings here are part of the external contract: callers and
// tests assert on them, so changes are breaking.

use thiserror::Error;

/// Errors that can occur while registering or executing tools.
#[derive(Error, Debug)]
pub enum GatewayError {
	#[error("tool not found")]
	ToolNotFound,

	#[error("service {0} is currently unhealthy")]
	ServiceUnhealthy(String),

	#[error("invalid tool definition: {0}")]
	InvalidTool(String),

	#[error("invalid http tool definition")]
	InvalidHttpDefinition,

	#[error("failed to parse url: {0}")]
	UrlParse(String),

	#[error("no {kind} pool found for service: {service}")]
	PoolNotFound { kind: &'static str, service: String },

	#[error("pool exhausted for service: {0}")]
	PoolExhausted(String),

	#[error("failed to unmarshal tool inputs: {0}")]
	UnmarshalInputs(String),

	#[error("failed to parse input template: {0}")]
	InputTemplateParse(String),

	#[error("failed to parse output template: {0}")]
	OutputTemplateParse(String),

	#[error("failed to render input template: {0}")]
	InputTemplateRender(String),

	#[error("missing required parameter: {0}")]
	MissingRequiredParameter(String),

	#[error("parameter {0:?}: contains forbidden characters")]
	ForbiddenCharacters(String),

	#[error("path traversal attempt detected")]
	PathTraversal,

	#[error("file: scheme detected")]
	FileScheme,

	#[error("shell injection detected")]
	ShellInjection,

	#[error("interpreter injection detected")]
	InterpreterInjection,

	#[error("argument injection detected")]
	ArgumentInjection,

	#[error("unsafe url: {0}")]
	UnsafeUrl(String),

	#[error("failed to resolve secret: {0}")]
	SecretResolve(String),

	#[error("upstream HTTP {status}: {body}")]
	UpstreamHttp { status: u16, body: String },

	#[error("upstream OpenAPI request failed with status {0}")]
	UpstreamOpenApi(u16),

	#[error("failed to invoke grpc method: {0}")]
	GrpcInvoke(String),

	#[error("websocket exchange failed: {0}")]
	WebSocketExchange(String),

	#[error("webrtc exchange failed: {0}")]
	WebRtcExchange(String),

	#[error("subprocess failed: {0}")]
	Subprocess(String),

	#[error("response body exceeds maximum size")]
	ResponseTooLarge,

	#[error("tool execution denied by policy rule: {0}")]
	PolicyDenied(String),

	#[error("denied by default policy: {0}")]
	DefaultPolicyDenied(String),

	// Holds the pre-rendered suffix (": <msg>" or empty) so the contract
	// string "denied by webhook[: <msg>]" is exact in both shapes.
	#[error("denied by webhook{0}")]
	WebhookDenied(String),

	#[error("webhook error: {0}")]
	WebhookError(String),

	#[error("execution cancelled")]
	Cancelled,

	#[error("internal error: {0}")]
	Internal(String),
}

impl GatewayError {
	/// Denial from a webhook response, with an optional upstream message.
	pub fn webhook_denied(message: Option<&str>) -> Self {
		match message {
			Some(m) if !m.is_empty() => Self::WebhookDenied(format!(": {m}")),
			_ => Self::WebhookDenied(String::new()),
		}
	}

	pub fn pool_not_found(kind: &'static str, service: impl Into<String>) -> Self {
		Self::PoolNotFound {
			kind,
			service: service.into(),
		}
	}

	/// True for validation/security failures that must never be retried.
	pub fn is_security_violation(&self) -> bool {
		matches!(
			self,
			Self::PathTraversal
				| Self::FileScheme
				| Self::ShellInjection
				| Self::InterpreterInjection
				| Self::ArgumentInjection
				| Self::UnsafeUrl(_)
				| Self::ForbiddenCharacters(_)
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_contract_strings() {
		assert_eq!(GatewayError::ToolNotFound.to_string(), "tool not found");
		assert_eq!(
			GatewayError::ServiceUnhealthy("billing".into()).to_string(),
			"service billing is currently unhealthy"
		);
		assert_eq!(
			GatewayError::MissingRequiredParameter("userId".into()).to_string(),
			"missing required parameter: userId"
		);
		assert_eq!(
			GatewayError::InputTemplateRender("bad body".into()).to_string(),
			"failed to render input template: bad body"
		);
		assert_eq!(
			GatewayError::ForbiddenCharacters("q".into()).to_string(),
			"parameter \"q\": contains forbidden characters"
		);
		assert_eq!(
			GatewayError::pool_not_found("http", "svc").to_string(),
			"no http pool found for service: svc"
		);
		assert_eq!(
			GatewayError::PolicyDenied("sensitive-x".into()).to_string(),
			"tool execution denied by policy rule: sensitive-x"
		);
	}

	#[test]
	fn test_webhook_denied_shapes() {
		assert_eq!(
			GatewayError::webhook_denied(None).to_string(),
			"denied by webhook"
		);
		assert_eq!(
			GatewayError::webhook_denied(Some("quota exceeded")).to_string(),
			"denied by webhook: quota exceeded"
		);
	}

	#[test]
	fn test_security_violation_classification() {
		assert!(GatewayError::PathTraversal.is_security_violation());
		assert!(GatewayError::ShellInjection.is_security_violation());
		assert!(!GatewayError::ToolNotFound.is_security_violation());
	}
}
