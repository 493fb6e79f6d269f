// Upstream connection pooling interface
//
// The pool data structure itself is an external collaborator; the gateway
// consumes these traits. Connections are owned exclusively by whichever
// task has checked them out; broken connections are dropped rather than
// returned. `StaticPool` is the simple bounded implementation used by
// tests and single-process deployments.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::errors::GatewayError;

#[async_trait]
pub trait Pool<T: Send>: Send + Sync {
	/// Check a connection out, waiting for one to become available. The
	/// wait honours `cancel`.
	async fn get(&self, cancel: &CancellationToken) -> Result<T, GatewayError>;

	/// Return a healthy connection.
	fn put(&self, conn: T);

	/// Drop all pooled connections.
	fn close(&self);

	/// Number of currently idle connections.
	fn len(&self) -> usize;

	fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// Registry of per-service pools, keyed by service id and connection type.
#[derive(Default)]
pub struct PoolManager {
	pools: RwLock<HashMap<String, Box<dyn Any + Send + Sync>>>,
}

impl PoolManager {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register<T: Send + 'static>(&self, service_id: &str, pool: Arc<dyn Pool<T>>) {
		self
			.pools
			.write()
			.insert(service_id.to_string(), Box::new(pool));
	}

	/// Look up the pool registered for `service_id`, if it pools
	/// connections of type `T`.
	pub fn get_by_type<T: Send + 'static>(&self, service_id: &str) -> Option<Arc<dyn Pool<T>>> {
		let pools = self.pools.read();
		pools
			.get(service_id)
			.and_then(|boxed| boxed.downcast_ref::<Arc<dyn Pool<T>>>())
			.cloned()
	}

	pub fn remove(&self, service_id: &str) {
		self.pools.write().remove(service_id);
	}
}

struct StaticPoolState<T> {
	idle: VecDeque<T>,
	closed: bool,
}

/// A bounded pool over a fixed set of connections. `get` blocks until a
/// connection is returned (or the caller cancels); there is no internal
/// retry and no connection creation.
pub struct StaticPool<T> {
	service_id: String,
	state: parking_lot::Mutex<StaticPoolState<T>>,
	notify: Notify,
}

impl<T: Send> StaticPool<T> {
	pub fn new(service_id: impl Into<String>, conns: impl IntoIterator<Item = T>) -> Self {
		Self {
			service_id: service_id.into(),
			state: parking_lot::Mutex::new(StaticPoolState {
				idle: conns.into_iter().collect(),
				closed: false,
			}),
			notify: Notify::new(),
		}
	}
}

#[async_trait]
impl<T: Send> Pool<T> for StaticPool<T> {
	async fn get(&self, cancel: &CancellationToken) -> Result<T, GatewayError> {
		loop {
			{
				let mut state = self.state.lock();
				if state.closed {
					return Err(GatewayError::PoolExhausted(self.service_id.clone()));
				}
				if let Some(conn) = state.idle.pop_front() {
					return Ok(conn);
				}
			}
			tokio::select! {
				_ = self.notify.notified() => {},
				_ = cancel.cancelled() => return Err(GatewayError::Cancelled),
			}
		}
	}

	fn put(&self, conn: T) {
		let mut state = self.state.lock();
		if !state.closed {
			state.idle.push_back(conn);
		}
		drop(state);
		self.notify.notify_one();
	}

	fn close(&self) {
		let mut state = self.state.lock();
		state.closed = true;
		state.idle.clear();
		drop(state);
		self.notify.notify_waiters();
	}

	fn len(&self) -> usize {
		self.state.lock().idle.len()
	}
}
