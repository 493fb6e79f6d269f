// Webhook hook
//
// Delivers a cloud-event (spec v1.0) describing the invocation to an
// operator-supplied endpoint before and/or after the transport call. The
// response is itself a cloud event whose data decides: deny, allow, or
// allow-with-replacement. Requests are signed when a secret is configured.
// A default 5 s timeout applies even when the caller carries no deadline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{PostHook, PreHook, PreHookOutcome};
use crate::auth::Authenticator;
use crate::errors::GatewayError;
use crate::pipeline::{CallContext, ExecutionRequest};

pub const WEBHOOK_DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub const EVENT_TYPE_PRE_CALL: &str = "com.mcpany.tool.pre_call";
pub const EVENT_TYPE_POST_CALL: &str = "com.mcpany.tool.post_call";
pub const EVENT_SOURCE: &str = "mcpany/gateway";

const KIND_PRE_CALL: i32 = 1;
const KIND_POST_CALL: i32 = 2;

pub const HEADER_WEBHOOK_ID: &str = "Webhook-Id";
pub const HEADER_WEBHOOK_TIMESTAMP: &str = "Webhook-Timestamp";
pub const HEADER_WEBHOOK_SIGNATURE: &str = "Webhook-Signature";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
	pub url: String,

	/// HMAC-SHA256 signing secret; requests are unsigned when absent.
	#[serde(default)]
	pub signing_secret: Option<String>,

	#[serde(default)]
	pub timeout: Option<Duration>,
}

impl WebhookConfig {
	pub fn new(url: impl Into<String>) -> Self {
		Self {
			url: url.into(),
			signing_secret: None,
			timeout: None,
		}
	}

	pub fn with_signing_secret(mut self, secret: impl Into<String>) -> Self {
		self.signing_secret = Some(secret.into());
		self
	}
}

// Cloud-event envelope, spec v1.0, JSON structured mode.
#[derive(Debug, Serialize, Deserialize)]
struct CloudEvent<T> {
	id: String,
	source: String,
	specversion: String,
	#[serde(rename = "type")]
	event_type: String,
	time: String,
	datacontenttype: String,
	data: T,
}

#[derive(Debug, Serialize)]
struct HookCallData<'a> {
	kind: i32,
	tool_name: &'a str,
	#[serde(skip_serializing_if = "Option::is_none")]
	inputs: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	result: Option<&'a Value>,
}

#[derive(Debug, Deserialize)]
struct HookResponseData {
	allowed: bool,
	#[serde(default)]
	status: Option<HookStatus>,
	#[serde(default)]
	replacement_object: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct HookStatus {
	#[allow(dead_code)]
	#[serde(default)]
	code: i32,
	#[serde(default)]
	message: String,
}

/// Pre/post webhook transport. One instance serves both hook positions.
pub struct WebhookHook {
	config: WebhookConfig,
	client: reqwest::Client,
	authenticator: Arc<dyn Authenticator>,
}

impl WebhookHook {
	pub fn new(config: WebhookConfig, authenticator: Arc<dyn Authenticator>) -> Self {
		Self {
			config,
			client: reqwest::Client::new(),
			authenticator,
		}
	}

	fn timeout(&self) -> Duration {
		self.config.timeout.unwrap_or(WEBHOOK_DEFAULT_TIMEOUT)
	}

	fn sign(&self, id: &str, timestamp: i64, payload: &[u8]) -> Option<String> {
		let secret = self.config.signing_secret.as_ref()?;
		let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
			.expect("hmac accepts any key length");
		mac.update(id.as_bytes());
		mac.update(b".");
		mac.update(timestamp.to_string().as_bytes());
		mac.update(b".");
		mac.update(payload);
		let signature = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());
		Some(format!("v1,{signature}"))
	}

	async fn call(
		&self,
		ctx: &CallContext,
		event_type: &str,
		data: HookCallData<'_>,
	) -> Result<HookResponseData, GatewayError> {
		let event = CloudEvent {
			id: Uuid::new_v4().to_string(),
			source: EVENT_SOURCE.to_string(),
			specversion: "1.0".to_string(),
			event_type: event_type.to_string(),
			time: chrono::Utc::now().to_rfc3339(),
			datacontenttype: "application/json".to_string(),
			data,
		};
		let payload = serde_json::to_vec(&event)
			.map_err(|e| GatewayError::WebhookError(e.to_string()))?;

		let mut headers = http::HeaderMap::new();
		headers.insert(
			http::header::CONTENT_TYPE,
			http::HeaderValue::from_static("application/cloudevents+json"),
		);
		if self.config.signing_secret.is_some() {
			let timestamp = chrono::Utc::now().timestamp();
			let signature = self
				.sign(&event.id, timestamp, &payload)
				.expect("secret checked above");
			let insert = |headers: &mut http::HeaderMap, name: &'static str, value: String| {
				if let Ok(v) = http::HeaderValue::from_str(&value) {
					headers.insert(name, v);
				}
			};
			insert(&mut headers, HEADER_WEBHOOK_ID, event.id.clone());
			insert(&mut headers, HEADER_WEBHOOK_TIMESTAMP, timestamp.to_string());
			insert(&mut headers, HEADER_WEBHOOK_SIGNATURE, signature);
		}
		self.authenticator.authenticate(&mut headers).await?;

		let request = self
			.client
			.post(&self.config.url)
			.headers(headers)
			.body(payload)
			.timeout(self.timeout());

		let response = tokio::select! {
			r = request.send() => r.map_err(|e| {
				if e.is_timeout() {
					GatewayError::WebhookError("request timed out".to_string())
				} else {
					GatewayError::WebhookError(e.to_string())
				}
			})?,
			_ = ctx.cancellation().cancelled() => return Err(GatewayError::Cancelled),
		};

		let status = response.status();
		if !status.is_success() {
			return Err(GatewayError::WebhookError(format!(
				"unexpected status {}",
				status.as_u16()
			)));
		}

		let body = response
			.bytes()
			.await
			.map_err(|e| GatewayError::WebhookError(e.to_string()))?;
		let envelope: CloudEvent<HookResponseData> = serde_json::from_slice(&body)
			.map_err(|e| GatewayError::WebhookError(format!("invalid response event: {e}")))?;
		Ok(envelope.data)
	}
}

#[async_trait]
impl PreHook for WebhookHook {
	fn name(&self) -> &str {
		"webhook"
	}

	async fn execute_pre(
		&self,
		ctx: &CallContext,
		req: &ExecutionRequest,
	) -> Result<PreHookOutcome, GatewayError> {
		let inputs: Value = serde_json::from_slice(&req.tool_inputs).unwrap_or(Value::Null);
		let data = HookCallData {
			kind: KIND_PRE_CALL,
			tool_name: &req.tool_name,
			inputs: Some(inputs),
			result: None,
		};
		let response = self.call(ctx, EVENT_TYPE_PRE_CALL, data).await?;

		if !response.allowed {
			let message = response.status.as_ref().map(|s| s.message.as_str());
			return Err(GatewayError::webhook_denied(message));
		}
		if let Some(replacement) = response.replacement_object {
			debug!(target: "gateway", tool = %req.tool_name, "webhook replaced request inputs");
			return Ok(PreHookOutcome::ReplaceRequest(req.replaced_with(replacement)));
		}
		Ok(PreHookOutcome::Continue)
	}
}

#[async_trait]
impl PostHook for WebhookHook {
	fn name(&self) -> &str {
		"webhook"
	}

	async fn execute_post(
		&self,
		ctx: &CallContext,
		req: &ExecutionRequest,
		result: Value,
	) -> Result<Value, GatewayError> {
		let data = HookCallData {
			kind: KIND_POST_CALL,
			tool_name: &req.tool_name,
			inputs: None,
			result: Some(&result),
		};
		let response = self.call(ctx, EVENT_TYPE_POST_CALL, data).await?;

		if !response.allowed {
			let message = response.status.as_ref().map(|s| s.message.as_str());
			return Err(GatewayError::webhook_denied(message));
		}
		match response.replacement_object {
			Some(replacement) => Ok(unwrap_value_envelope(replacement)),
			None => Ok(result),
		}
	}
}

// Webhooks return objects; a replacement of exactly {"value": v} is the
// envelope form for returning a primitive result.
fn unwrap_value_envelope(replacement: Value) -> Value {
	match replacement {
		Value::Object(ref map) if map.len() == 1 && map.contains_key("value") => {
			map.get("value").cloned().unwrap_or(Value::Null)
		},
		other => other,
	}
}

/// Verify an incoming signature header against a payload (used by webhook
/// receivers in tests and by nested gateways).
pub fn verify_signature(
	secret: &str,
	id: &str,
	timestamp: &str,
	payload: &[u8],
	signature_header: &str,
) -> bool {
	let Some(encoded) = signature_header.strip_prefix("v1,") else {
		return false;
	};
	let Ok(expected) = base64::engine::general_purpose::STANDARD.decode(encoded) else {
		return false;
	};
	let mut mac = match Hmac::<Sha256>::new_from_slice(secret.as_bytes()) {
		Ok(m) => m,
		Err(e) => {
			warn!(target: "gateway", error = %e, "failed to build hmac");
			return false;
		},
	};
	mac.update(id.as_bytes());
	mac.update(b".");
	mac.update(timestamp.as_bytes());
	mac.update(b".");
	mac.update(payload);
	mac.verify_slice(&expected).is_ok()
}
