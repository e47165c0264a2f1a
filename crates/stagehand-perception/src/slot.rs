//! Single-slot mailbox holding the latest frame/snapshot pair.
//!
//! The perception loop is the only writer; task threads read.  A write swaps
//! the whole `Arc<Perception>`, so readers always see a frame together with
//! the snapshot that was computed from it.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use stagehand_types::Frame;

use crate::snapshot::Snapshot;

/// One published perception result.
#[derive(Debug, Clone)]
pub struct Perception {
    /// Monotonic publish counter; `0` is the empty initial value.
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
    pub frame: Arc<Frame>,
    pub snapshot: Snapshot,
}

impl Perception {
    fn empty() -> Self {
        Self {
            sequence: 0,
            captured_at: Utc::now(),
            frame: Arc::new(Frame::filled(0, 0, [0, 0, 0])),
            snapshot: Snapshot::default(),
        }
    }
}

/// Atomically swappable handle to the latest [`Perception`].
pub struct PerceptionSlot {
    inner: RwLock<Arc<Perception>>,
}

impl Default for PerceptionSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl PerceptionSlot {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Arc::new(Perception::empty())),
        }
    }

    /// Publish a new pair and return its sequence number.
    pub fn publish(&self, frame: Arc<Frame>, snapshot: Snapshot) -> u64 {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let sequence = guard.sequence + 1;
        *guard = Arc::new(Perception {
            sequence,
            captured_at: Utc::now(),
            frame,
            snapshot,
        });
        sequence
    }

    /// The latest published pair.
    pub fn latest(&self) -> Arc<Perception> {
        Arc::clone(&self.inner.read().unwrap_or_else(|e| e.into_inner()))
    }
}
