// Activity stream
//
// Bounded fan-out of registry and execution events for topology/visibility
// consumers. Producers never block: when the channel is full the event is
// dropped with a warning.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

pub const DEFAULT_ACTIVITY_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ActivityEvent {
	ToolRegistered {
		tool_id: String,
		service_id: String,
	},
	ToolsCleared {
		service_id: String,
	},
	ServiceHealthChanged {
		service_id: String,
		healthy: bool,
	},
	ToolExecuted {
		tool_name: String,
		success: bool,
	},
}

/// Non-blocking producer side of the activity stream.
pub struct ActivityStream {
	tx: mpsc::Sender<ActivityEvent>,
}

impl ActivityStream {
	pub fn new() -> (Self, mpsc::Receiver<ActivityEvent>) {
		Self::with_capacity(DEFAULT_ACTIVITY_CAPACITY)
	}

	pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<ActivityEvent>) {
		let (tx, rx) = mpsc::channel(capacity.max(1));
		(Self { tx }, rx)
	}

	/// Emit an event; drops (with a warning) rather than blocking when the
	/// consumer lags.
	pub fn emit(&self, event: ActivityEvent) {
		if let Err(mpsc::error::TrySendError::Full(event)) = self.tx.try_send(event) {
			warn!(target: "gateway", ?event, "activity stream full; dropping event");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_events_delivered_in_order() {
		let (stream, mut rx) = ActivityStream::with_capacity(8);
		stream.emit(ActivityEvent::ToolRegistered {
			tool_id: "svc.t".into(),
			service_id: "svc".into(),
		});
		stream.emit(ActivityEvent::ToolExecuted {
			tool_name: "svc.t".into(),
			success: true,
		});
		assert!(matches!(
			rx.recv().await.unwrap(),
			ActivityEvent::ToolRegistered { .. }
		));
		assert!(matches!(
			rx.recv().await.unwrap(),
			ActivityEvent::ToolExecuted { .. }
		));
	}

	#[tokio::test]
	async fn test_full_channel_drops_without_blocking() {
		let (stream, mut rx) = ActivityStream::with_capacity(1);
		stream.emit(ActivityEvent::ToolsCleared {
			service_id: "a".into(),
		});
		// Channel is full; this event is dropped, not queued.
		stream.emit(ActivityEvent::ToolsCleared {
			service_id: "b".into(),
		});
		let first = rx.recv().await.unwrap();
		assert!(matches!(
			first,
			ActivityEvent::ToolsCleared { service_id } if service_id == "a"
		));
		assert!(rx.try_recv().is_err());
	}
}
