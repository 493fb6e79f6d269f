// WebRTC adapter
//
// The FQN is `WEBRTC <signalling-url>`. The pool stores prepared peer
// connections; a call that finds its peer unconnected runs the signalling
// handshake (offer over HTTP POST, answer applied locally) first. Each
// call then opens a fresh data channel, sends one message, reads one,
// closes the channel and returns the peer. The peer connection itself is
// an external collaborator behind the RtcPeer trait; STUN can be disabled
// via the environment for tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{check_required, decode_inputs, resolve_param_values, CacheConfig, ToolExecutor};
use crate::auth::Authenticator;
use crate::config;
use crate::errors::GatewayError;
use crate::pipeline::{CallContext, ExecutionRequest};
use crate::pool::{Pool, PoolManager};
use crate::registry::ToolDef;
use crate::secret::SecretResolver;
use crate::security;
use crate::template::{OutputTransformer, Template};

const WEBRTC_FQN_PREFIX: &str = "WEBRTC ";

/// Default public STUN servers used when preparing peers, unless disabled
/// via `MCPANY_WEBRTC_DISABLE_STUN`.
pub fn stun_servers() -> Vec<String> {
	if config::webrtc_stun_disabled() {
		Vec::new()
	} else {
		vec!["stun:stun.l.google.com:19302".to_string()]
	}
}

/// A prepared peer connection (external WebRTC library behind the trait).
#[async_trait]
pub trait RtcPeer: Send + Sync {
	fn is_connected(&self) -> bool;

	/// Produce the local offer SDP. Resolves once ICE gathering completes,
	/// so awaiting this is the gather-complete wait.
	async fn create_offer(&self) -> Result<String, GatewayError>;

	/// Apply the remote answer SDP.
	async fn apply_answer(&self, sdp: &str) -> Result<(), GatewayError>;

	/// Open a fresh data channel for one exchange.
	async fn open_channel(&self, label: &str) -> Result<Box<dyn RtcDataChannel>, GatewayError>;
}

/// An ephemeral data channel carrying exactly one message each way.
#[async_trait]
pub trait RtcDataChannel: Send {
	async fn send_text(&mut self, text: &str) -> Result<(), GatewayError>;
	async fn recv_text(&mut self) -> Result<String, GatewayError>;
	async fn close(&mut self) -> Result<(), GatewayError>;
}

pub struct WebRtcTool {
	def: ToolDef,
	signaling_url: String,
	input_template: Option<Template>,
	output: OutputTransformer,
	pools: Arc<PoolManager>,
	authenticator: Arc<dyn Authenticator>,
	secrets: Arc<dyn SecretResolver>,
	http: reqwest::Client,
	cache: Option<CacheConfig>,
}

impl WebRtcTool {
	pub fn new(
		def: ToolDef,
		pools: Arc<PoolManager>,
		authenticator: Arc<dyn Authenticator>,
		secrets: Arc<dyn SecretResolver>,
	) -> Result<Self, GatewayError> {
		let signaling_url = def
			.method_fqn
			.strip_prefix(WEBRTC_FQN_PREFIX)
			.map(str::trim)
			.filter(|url| !url.is_empty())
			.ok_or_else(|| {
				GatewayError::InvalidTool(format!(
					"webrtc fqn must be \"WEBRTC <url>\", got {:?}",
					def.method_fqn
				))
			})?
			.to_string();
		let input_template = def
			.input_template
			.as_deref()
			.map(Template::parse)
			.transpose()
			.map_err(GatewayError::InputTemplateParse)?;
		let output = def
			.output
			.as_ref()
			.map(OutputTransformer::compile)
			.transpose()?
			.unwrap_or_default();
		Ok(Self {
			def,
			signaling_url,
			input_template,
			output,
			pools,
			authenticator,
			secrets,
			http: reqwest::Client::new(),
			cache: None,
		})
	}

	pub fn with_cache_config(mut self, cache: CacheConfig) -> Self {
		self.cache = Some(cache);
		self
	}

	/// Offer/answer exchange against the signalling server. Cancellation
	/// aborts both the gather-complete wait and the POST.
	async fn signal(&self, ctx: &CallContext, peer: &dyn RtcPeer) -> Result<(), GatewayError> {
		let offer = tokio::select! {
			o = peer.create_offer() => o?,
			_ = ctx.cancellation().cancelled() => return Err(GatewayError::Cancelled),
		};

		security::is_safe_url(&self.signaling_url)?;
		let mut headers = http::HeaderMap::new();
		headers.insert(
			http::header::CONTENT_TYPE,
			http::HeaderValue::from_static("application/json"),
		);
		self.authenticator.authenticate(&mut headers).await?;

		let request = self
			.http
			.post(&self.signaling_url)
			.headers(headers)
			.json(&json!({"type": "offer", "sdp": offer}));

		let response = tokio::select! {
			r = request.send() => r.map_err(|e| GatewayError::WebRtcExchange(format!("signalling failed: {e}")))?,
			_ = ctx.cancellation().cancelled() => return Err(GatewayError::Cancelled),
		};
		if !response.status().is_success() {
			return Err(GatewayError::WebRtcExchange(format!(
				"signalling failed with status {}",
				response.status().as_u16()
			)));
		}
		let answer: Value = response
			.json()
			.await
			.map_err(|e| GatewayError::WebRtcExchange(format!("invalid signalling response: {e}")))?;
		let sdp = answer
			.get("sdp")
			.and_then(Value::as_str)
			.ok_or_else(|| GatewayError::WebRtcExchange("signalling response missing sdp".to_string()))?;
		peer.apply_answer(sdp).await
	}

	fn build_message(&self, req: &ExecutionRequest, resolved: &HashMap<String, String>) -> Result<String, GatewayError> {
		if let Some(template) = &self.input_template {
			let mut values = HashMap::new();
			let mut required = HashSet::new();
			for mapping in &self.def.parameters {
				if mapping.schema.required {
					required.insert(mapping.name().to_string());
				}
				if let Some(raw) = resolved.get(mapping.name()) {
					let value = if mapping.disable_escape {
						raw.clone()
					} else {
						security::json_encode(raw)
					};
					values.insert(mapping.name().to_string(), value);
				}
			}
			return template.render(&values, &required);
		}
		Ok(String::from_utf8_lossy(&req.tool_inputs).into_owned())
	}
}

#[async_trait]
impl ToolExecutor for WebRtcTool {
	fn tool(&self) -> &ToolDef {
		&self.def
	}

	async fn execute(
		&self,
		ctx: &CallContext,
		req: &ExecutionRequest,
	) -> Result<Value, GatewayError> {
		let pool: Arc<dyn Pool<Box<dyn RtcPeer>>> = self
			.pools
			.get_by_type::<Box<dyn RtcPeer>>(&self.def.service_id)
			.ok_or_else(|| GatewayError::pool_not_found("webrtc", &self.def.service_id))?;

		let inputs = decode_inputs(req)?;
		check_required(&self.def, &inputs)?;
		let resolved = resolve_param_values(&self.def, &inputs, self.secrets.as_ref()).await?;
		let message = self.build_message(req, &resolved)?;

		let peer = pool.get(ctx.cancellation()).await?;

		if !peer.is_connected() {
			debug!(target: "gateway", tool = %self.def.name, "peer not connected; running signalling handshake");
			if let Err(e) = self.signal(ctx, peer.as_ref()).await {
				warn!(target: "gateway", tool = %self.def.name, error = %e, "signalling failed; discarding peer");
				return Err(e);
			}
		}

		let label = format!("tool-{}", Uuid::new_v4());
		let exchange = async {
			let mut channel = peer.open_channel(&label).await?;
			channel.send_text(&message).await?;
			let response = channel.recv_text().await;
			// Close regardless of the read outcome.
			let _ = channel.close().await;
			response
		};

		let result = tokio::select! {
			r = exchange => r,
			_ = ctx.cancellation().cancelled() => {
				pool.put(peer);
				return Err(GatewayError::Cancelled);
			},
		};

		match result {
			Ok(text) => {
				pool.put(peer);
				self.output.apply(text.as_bytes())
			},
			Err(e) => {
				warn!(target: "gateway", tool = %self.def.name, error = %e, "webrtc exchange failed; discarding peer");
				Err(e)
			},
		}
	}

	fn cache_config(&self) -> Option<CacheConfig> {
		self.cache
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::auth::NoopAuthenticator;
	use crate::pool::StaticPool;
	use crate::secret::EnvSecretResolver;
	use parking_lot::Mutex;
	use wiremock::matchers::method;
	use wiremock::{Mock, MockServer, ResponseTemplate};

	struct FakeChannel {
		sent: Arc<Mutex<Vec<String>>>,
		response: String,
	}

	#[async_trait]
	impl RtcDataChannel for FakeChannel {
		async fn send_text(&mut self, text: &str) -> Result<(), GatewayError> {
			self.sent.lock().push(text.to_string());
			Ok(())
		}

		async fn recv_text(&mut self) -> Result<String, GatewayError> {
			Ok(self.response.clone())
		}

		async fn close(&mut self) -> Result<(), GatewayError> {
			Ok(())
		}
	}

	struct FakePeer {
		connected: std::sync::atomic::AtomicBool,
		answers: Arc<Mutex<Vec<String>>>,
		sent: Arc<Mutex<Vec<String>>>,
		channels: Arc<Mutex<Vec<String>>>,
		response: String,
	}

	impl FakePeer {
		fn new(connected: bool, response: &str) -> Self {
			Self {
				connected: std::sync::atomic::AtomicBool::new(connected),
				answers: Arc::new(Mutex::new(Vec::new())),
				sent: Arc::new(Mutex::new(Vec::new())),
				channels: Arc::new(Mutex::new(Vec::new())),
				response: response.to_string(),
			}
		}
	}

	#[async_trait]
	impl RtcPeer for FakePeer {
		fn is_connected(&self) -> bool {
			self.connected.load(std::sync::atomic::Ordering::SeqCst)
		}

		async fn create_offer(&self) -> Result<String, GatewayError> {
			Ok("v=0 offer".to_string())
		}

		async fn apply_answer(&self, sdp: &str) -> Result<(), GatewayError> {
			self.answers.lock().push(sdp.to_string());
			self
				.connected
				.store(true, std::sync::atomic::Ordering::SeqCst);
			Ok(())
		}

		async fn open_channel(&self, label: &str) -> Result<Box<dyn RtcDataChannel>, GatewayError> {
			self.channels.lock().push(label.to_string());
			Ok(Box::new(FakeChannel {
				sent: self.sent.clone(),
				response: self.response.clone(),
			}))
		}
	}

	fn allow_loopback() {
		std::env::set_var(crate::config::ENV_ALLOW_LOOPBACK, "true");
	}

	fn pools_with_peer(service: &str, peer: FakePeer) -> Arc<PoolManager> {
		let pools = Arc::new(PoolManager::new());
		let boxed: Box<dyn RtcPeer> = Box::new(peer);
		let pool: Arc<dyn Pool<Box<dyn RtcPeer>>> =
			Arc::new(StaticPool::new(service, vec![boxed]));
		pools.register(service, pool);
		pools
	}

	fn rtc_tool(def: ToolDef, pools: Arc<PoolManager>) -> WebRtcTool {
		WebRtcTool::new(
			def,
			pools,
			Arc::new(NoopAuthenticator),
			Arc::new(EnvSecretResolver),
		)
		.unwrap()
	}

	#[test]
	fn test_fqn_parsing() {
		let def = ToolDef::new("t", "svc", "WEBRTC http://signal.example/session");
		let tool = rtc_tool(def, Arc::new(PoolManager::new()));
		assert_eq!(tool.signaling_url, "http://signal.example/session");

		let bad = ToolDef::new("t", "svc", "GET http://x");
		assert!(WebRtcTool::new(
			bad,
			Arc::new(PoolManager::new()),
			Arc::new(NoopAuthenticator),
			Arc::new(EnvSecretResolver),
		)
		.is_err());
	}

	#[test]
	fn test_stun_disabled_via_env() {
		std::env::set_var(config::ENV_WEBRTC_DISABLE_STUN, "true");
		assert!(stun_servers().is_empty());
		std::env::remove_var(config::ENV_WEBRTC_DISABLE_STUN);
		assert!(!stun_servers().is_empty());
	}

	#[tokio::test]
	async fn test_connected_peer_exchanges_without_signalling() {
		let peer = FakePeer::new(true, r#"{"pong": true}"#);
		let sent = peer.sent.clone();
		let channels = peer.channels.clone();
		let pools = pools_with_peer("rtc-svc", peer);

		let def = ToolDef::new("ping", "rtc-svc", "WEBRTC http://signal.example/");
		let tool = rtc_tool(def, pools.clone());
		let ctx = CallContext::new();
		let out = tool
			.execute(&ctx, &ExecutionRequest::new("ping", serde_json::json!({"n": 1})))
			.await
			.unwrap();
		assert_eq!(out, serde_json::json!({"pong": true}));

		assert_eq!(sent.lock().len(), 1);
		// A fresh channel per call, unique label.
		assert_eq!(channels.lock().len(), 1);
		assert!(channels.lock()[0].starts_with("tool-"));

		// Peer returned to the pool.
		let pool = pools.get_by_type::<Box<dyn RtcPeer>>("rtc-svc").unwrap();
		assert_eq!(pool.len(), 1);
	}

	#[tokio::test]
	async fn test_unconnected_peer_signals_first() {
		allow_loopback();
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"type": "answer",
				"sdp": "v=0 answer",
			})))
			.mount(&server)
			.await;

		let peer = FakePeer::new(false, r#""ok""#);
		let answers = peer.answers.clone();
		let pools = pools_with_peer("rtc-svc", peer);

		let def = ToolDef::new("t", "rtc-svc", format!("WEBRTC {}/session", server.uri()));
		let tool = rtc_tool(def, pools);
		let ctx = CallContext::new();
		let out = tool
			.execute(&ctx, &ExecutionRequest::new("t", serde_json::json!({})))
			.await
			.unwrap();
		assert_eq!(out, serde_json::json!("ok"));
		assert_eq!(answers.lock().as_slice(), ["v=0 answer"]);
	}

	#[tokio::test]
	async fn test_signalling_failure_discards_peer() {
		allow_loopback();
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(502))
			.mount(&server)
			.await;

		let peer = FakePeer::new(false, r#""never""#);
		let pools = pools_with_peer("rtc-svc", peer);
		let def = ToolDef::new("t", "rtc-svc", format!("WEBRTC {}/session", server.uri()));
		let tool = rtc_tool(def, pools.clone());
		let ctx = CallContext::new();
		let err = tool
			.execute(&ctx, &ExecutionRequest::new("t", serde_json::json!({})))
			.await
			.unwrap_err();
		assert!(matches!(err, GatewayError::WebRtcExchange(_)), "{err}");

		let pool = pools.get_by_type::<Box<dyn RtcPeer>>("rtc-svc").unwrap();
		assert_eq!(pool.len(), 0);
	}

	#[tokio::test]
	async fn test_cancellation_aborts_exchange() {
		struct StallingPeer;

		#[async_trait]
		impl RtcPeer for StallingPeer {
			fn is_connected(&self) -> bool {
				true
			}

			async fn create_offer(&self) -> Result<String, GatewayError> {
				Ok(String::new())
			}

			async fn apply_answer(&self, _sdp: &str) -> Result<(), GatewayError> {
				Ok(())
			}

			async fn open_channel(
				&self,
				_label: &str,
			) -> Result<Box<dyn RtcDataChannel>, GatewayError> {
				// Simulate a read that never completes.
				futures_util::future::pending::<()>().await;
				unreachable!()
			}
		}

		let pools = Arc::new(PoolManager::new());
		let boxed: Box<dyn RtcPeer> = Box::new(StallingPeer);
		let pool: Arc<dyn Pool<Box<dyn RtcPeer>>> =
			Arc::new(StaticPool::new("rtc-svc", vec![boxed]));
		pools.register("rtc-svc", pool);

		let def = ToolDef::new("t", "rtc-svc", "WEBRTC http://signal.example/");
		let tool = rtc_tool(def, pools);
		let token = tokio_util::sync::CancellationToken::new();
		let ctx = CallContext::with_cancellation(token.clone());

		let cancel = tokio::spawn(async move {
			tokio::time::sleep(std::time::Duration::from_millis(20)).await;
			token.cancel();
		});
		let err = tool
			.execute(&ctx, &ExecutionRequest::new("t", serde_json::json!({})))
			.await
			.unwrap_err();
		assert!(matches!(err, GatewayError::Cancelled));
		cancel.await.unwrap();
	}
}
