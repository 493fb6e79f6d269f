// Execution history ring buffer
//
// A fixed-capacity record of invocation outcomes. Appends are O(1) with a
// monotonic head index; listing reconstitutes chronological order across
// the wrap point. The append is a best-effort terminal side-effect of the
// pipeline and never affects the caller.

use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use serde::Serialize;

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
	pub tool_name: String,
	pub timestamp: SystemTime,
	pub duration: Duration,
	pub success: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

impl ExecutionRecord {
	pub fn success(tool_name: impl Into<String>, duration: Duration) -> Self {
		Self {
			tool_name: tool_name.into(),
			timestamp: SystemTime::now(),
			duration,
			success: true,
			error: None,
		}
	}

	pub fn failure(
		tool_name: impl Into<String>,
		duration: Duration,
		error: impl Into<String>,
	) -> Self {
		Self {
			tool_name: tool_name.into(),
			timestamp: SystemTime::now(),
			duration,
			success: false,
			error: Some(error.into()),
		}
	}
}

struct Ring {
	entries: Vec<ExecutionRecord>,
	head: usize,
	full: bool,
}

/// Bounded, mutex-protected execution history.
pub struct ExecutionHistory {
	capacity: usize,
	ring: Mutex<Ring>,
}

impl Default for ExecutionHistory {
	fn default() -> Self {
		Self::new(DEFAULT_HISTORY_CAPACITY)
	}
}

impl ExecutionHistory {
	pub fn new(capacity: usize) -> Self {
		let capacity = capacity.max(1);
		Self {
			capacity,
			ring: Mutex::new(Ring {
				entries: Vec::with_capacity(capacity),
				head: 0,
				full: false,
			}),
		}
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}

	pub fn add(&self, record: ExecutionRecord) {
		let mut ring = self.ring.lock();
		if ring.full {
			let head = ring.head;
			ring.entries[head] = record;
		} else {
			ring.entries.push(record);
		}
		ring.head = (ring.head + 1) % self.capacity;
		if ring.head == 0 && !ring.entries.is_empty() {
			ring.full = ring.entries.len() == self.capacity;
		}
	}

	/// Snapshot in chronological order regardless of wrap.
	pub fn list(&self) -> Vec<ExecutionRecord> {
		let ring = self.ring.lock();
		if ring.full {
			let mut out = Vec::with_capacity(self.capacity);
			out.extend_from_slice(&ring.entries[ring.head..]);
			out.extend_from_slice(&ring.entries[..ring.head]);
			out
		} else {
			ring.entries.clone()
		}
	}

	pub fn len(&self) -> usize {
		let ring = self.ring.lock();
		ring.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
