// Signalling bus
//
// Topic-addressed pub/sub used to bridge external MCP tool invocations
// into the execution pipeline. Each bridged call uses a fresh correlation
// id and a subscribe-once handler; the subscription is released on every
// exit path (response, caller cancellation, safety timeout).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::GatewayError;

/// Upper bound on how long a bridged call may wait for its response.
pub const BUS_BRIDGE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
	pub correlation_id: String,
	pub payload: Value,
}

/// A one-shot subscription handle. Dropping it releases the subscription.
pub struct BusSubscription {
	rx: oneshot::Receiver<BusMessage>,
	_guard: Box<dyn Send>,
}

impl BusSubscription {
	pub fn new(rx: oneshot::Receiver<BusMessage>, guard: Box<dyn Send>) -> Self {
		Self { rx, _guard: guard }
	}

	pub async fn recv(self) -> Result<BusMessage, GatewayError> {
		self
			.rx
			.await
			.map_err(|_| GatewayError::Internal("bus subscription dropped".to_string()))
	}
}

#[async_trait]
pub trait SignalBus: Send + Sync {
	/// Publish a message to every subscriber of `topic` and to the
	/// matching correlation-id subscription, if any.
	async fn publish(&self, topic: &str, message: BusMessage) -> Result<(), GatewayError>;

	/// Subscribe for exactly one message on `topic` carrying
	/// `correlation_id`.
	async fn subscribe_once(
		&self,
		topic: &str,
		correlation_id: &str,
	) -> Result<BusSubscription, GatewayError>;

	/// Stream subscription for all messages on `topic`.
	async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<BusMessage>, GatewayError>;
}

type OnceKey = (String, String);

#[derive(Default)]
struct InMemoryBusState {
	once: HashMap<OnceKey, oneshot::Sender<BusMessage>>,
	streams: HashMap<String, Vec<mpsc::Sender<BusMessage>>>,
}

/// In-process bus used by tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryBus {
	state: Arc<Mutex<InMemoryBusState>>,
}

impl InMemoryBus {
	pub fn new() -> Self {
		Self::default()
	}
}

struct OnceGuard {
	state: Arc<Mutex<InMemoryBusState>>,
	key: OnceKey,
}

impl Drop for OnceGuard {
	fn drop(&mut self) {
		self.state.lock().once.remove(&self.key);
	}
}

#[async_trait]
impl SignalBus for InMemoryBus {
	async fn publish(&self, topic: &str, message: BusMessage) -> Result<(), GatewayError> {
		let mut state = self.state.lock();
		let key = (topic.to_string(), message.correlation_id.clone());
		if let Some(tx) = state.once.remove(&key) {
			let _ = tx.send(message.clone());
		}
		if let Some(subscribers) = state.streams.get_mut(topic) {
			subscribers.retain(|tx| match tx.try_send(message.clone()) {
				Ok(()) => true,
				Err(mpsc::error::TrySendError::Full(_)) => {
					warn!(target: "gateway", topic, "bus subscriber full; dropping message");
					true
				},
				Err(mpsc::error::TrySendError::Closed(_)) => false,
			});
		}
		Ok(())
	}

	async fn subscribe_once(
		&self,
		topic: &str,
		correlation_id: &str,
	) -> Result<BusSubscription, GatewayError> {
		let (tx, rx) = oneshot::channel();
		let key = (topic.to_string(), correlation_id.to_string());
		self.state.lock().once.insert(key.clone(), tx);
		Ok(BusSubscription::new(
			rx,
			Box::new(OnceGuard {
				state: self.state.clone(),
				key,
			}),
		))
	}

	async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<BusMessage>, GatewayError> {
		let (tx, rx) = mpsc::channel(1024);
		self
			.state
			.lock()
			.streams
			.entry(topic.to_string())
			.or_default()
			.push(tx);
		Ok(rx)
	}
}

/// Bridge one request/response exchange over the bus: subscribe-once on
/// the response topic, publish the request, then wait for the response,
/// caller cancellation, or the safety timeout, whichever happens first.
/// The subscription is released on every exit.
pub async fn request_over_bus(
	bus: &dyn SignalBus,
	topic: &str,
	payload: Value,
	cancel: &CancellationToken,
) -> Result<Value, GatewayError> {
	let correlation_id = Uuid::new_v4().to_string();
	let request_topic = format!("{topic}.request");
	let response_topic = format!("{topic}.response");

	let subscription = bus.subscribe_once(&response_topic, &correlation_id).await?;
	bus
		.publish(
			&request_topic,
			BusMessage {
				correlation_id: correlation_id.clone(),
				payload,
			},
		)
		.await?;

	debug!(target: "gateway", topic, correlation_id = %correlation_id, "bridged request published");

	tokio::select! {
		message = subscription.recv() => Ok(message?.payload),
		_ = cancel.cancelled() => Err(GatewayError::Cancelled),
		_ = tokio::time::sleep(BUS_BRIDGE_TIMEOUT) => Err(GatewayError::Internal(
			"timed out waiting for bus response".to_string(),
		)),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[tokio::test]
	async fn test_subscribe_once_routes_by_correlation_id() {
		let bus = InMemoryBus::new();
		let sub = bus.subscribe_once("t.response", "c1").await.unwrap();

		bus
			.publish(
				"t.response",
				BusMessage {
					correlation_id: "other".into(),
					payload: json!(1),
				},
			)
			.await
			.unwrap();
		bus
			.publish(
				"t.response",
				BusMessage {
					correlation_id: "c1".into(),
					payload: json!(2),
				},
			)
			.await
			.unwrap();

		let got = sub.recv().await.unwrap();
		assert_eq!(got.payload, json!(2));
	}

	#[tokio::test]
	async fn test_stream_subscription_sees_all_messages() {
		let bus = InMemoryBus::new();
		let mut rx = bus.subscribe("t.request").await.unwrap();
		for i in 0..3 {
			bus
				.publish(
					"t.request",
					BusMessage {
						correlation_id: format!("c{i}"),
						payload: json!(i),
					},
				)
				.await
				.unwrap();
		}
		assert_eq!(rx.recv().await.unwrap().payload, json!(0));
		assert_eq!(rx.recv().await.unwrap().payload, json!(1));
		assert_eq!(rx.recv().await.unwrap().payload, json!(2));
	}

	#[tokio::test]
	async fn test_request_over_bus_round_trip() {
		let bus = Arc::new(InMemoryBus::new());

		// Echo responder.
		let responder = {
			let bus = bus.clone();
			tokio::spawn(async move {
				let mut rx = bus.subscribe("tool.request").await.unwrap();
				let msg = rx.recv().await.unwrap();
				bus
					.publish(
						"tool.response",
						BusMessage {
							correlation_id: msg.correlation_id,
							payload: json!({"echo": msg.payload}),
						},
					)
					.await
					.unwrap();
			})
		};

		// Give the responder time to subscribe before publishing.
		tokio::task::yield_now().await;
		let cancel = CancellationToken::new();
		let out = request_over_bus(bus.as_ref(), "tool", json!("hi"), &cancel)
			.await
			.unwrap();
		assert_eq!(out, json!({"echo": "hi"}));
		responder.await.unwrap();
	}

	#[tokio::test]
	async fn test_request_over_bus_cancellation() {
		let bus = InMemoryBus::new();
		let cancel = CancellationToken::new();
		cancel.cancel();
		let err = request_over_bus(&bus, "tool", json!({}), &cancel)
			.await
			.unwrap_err();
		assert!(matches!(err, GatewayError::Cancelled));
	}

	#[tokio::test]
	async fn test_subscription_released_on_drop() {
		let bus = InMemoryBus::new();
		{
			let _sub = bus.subscribe_once("t", "c1").await.unwrap();
			assert_eq!(bus.state.lock().once.len(), 1);
		}
		assert!(bus.state.lock().once.is_empty());
	}
}
