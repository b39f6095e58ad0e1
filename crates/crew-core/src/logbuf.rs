//! Bounded in-memory log ring with live subscribers.
//!
//! Keeps the most recent structured records in a capacity-bounded ring
//! (oldest dropped first) and fans new records out over a broadcast
//! channel. Slow subscribers observe lag; they never block the writer.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default ring capacity.
const DEFAULT_CAPACITY: usize = 1_000;

/// One structured log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// When the record was produced.
    pub ts: DateTime<Utc>,
    /// Log level ("info", "warn", ...).
    pub level: String,
    /// Module or component that produced it.
    pub target: String,
    /// The rendered message.
    pub message: String,
}

impl LogRecord {
    /// Create a record timestamped now.
    pub fn new(
        level: impl Into<String>,
        target: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            ts: Utc::now(),
            level: level.into(),
            target: target.into(),
            message: message.into(),
        }
    }
}

/// Ring-buffered log store with broadcast fan-out.
pub struct LogBuffer {
    ring: Mutex<VecDeque<LogRecord>>,
    capacity: usize,
    tx: broadcast::Sender<LogRecord>,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl LogBuffer {
    /// Create a buffer holding at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            ring: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            tx,
        }
    }

    /// Append a record, evicting the oldest when full, and fan it out to
    /// subscribers.
    pub fn push(&self, record: LogRecord) {
        {
            let mut ring = self.ring.lock().unwrap();
            if ring.len() == self.capacity {
                ring.pop_front();
            }
            ring.push_back(record.clone());
        }
        // No receivers is fine.
        let _ = self.tx.send(record);
    }

    /// The most recent `n` records, oldest first.
    pub fn recent(&self, n: usize) -> Vec<LogRecord> {
        let ring = self.ring.lock().unwrap();
        let skip = ring.len().saturating_sub(n);
        ring.iter().skip(skip).cloned().collect()
    }

    /// Subscribe to records pushed from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LogRecord> {
        self.tx.subscribe()
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.ring.lock().unwrap().len()
    }

    /// True when the ring is empty.
    pub fn is_empty(&self) -> bool {
        self.ring.lock().unwrap().is_empty()
    }
}
