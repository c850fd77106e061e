//! Record of shadow-store failures awaiting reconciliation.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Write that failed on the shadow store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReconcileEntry {
    pub operation: Operation,
    pub key: String,
    pub error: String,
    pub at: DateTime<Utc>,
}

/// Point-in-time copy of the dual-write counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DualWriteStats {
    pub shadow_write_failures: u64,
    pub shadow_read_failures: u64,
    pub drift_detected: u64,
}

/// Bounded log of shadow write failures plus running counters.
///
/// Shared by every dual writer of a process; an operator task drains it and
/// repairs the new store.
pub struct ReconcileLog {
    entries: Mutex<VecDeque<ReconcileEntry>>,
    capacity: usize,
    dropped: AtomicU64,
    shadow_write_failures: AtomicU64,
    shadow_read_failures: AtomicU64,
    drift_detected: AtomicU64,
}

impl ReconcileLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            dropped: AtomicU64::new(0),
            shadow_write_failures: AtomicU64::new(0),
            shadow_read_failures: AtomicU64::new(0),
            drift_detected: AtomicU64::new(0),
        }
    }

    pub fn record(&self, operation: Operation, key: impl Into<String>, error: impl fmt::Display) {
        self.shadow_write_failures.fetch_add(1, Ordering::Relaxed);
        if self.capacity == 0 {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let entry = ReconcileEntry {
            operation,
            key: key.into(),
            error: error.to_string(),
            at: Utc::now(),
        };
        let mut entries = self.entries.lock().expect("reconcile log lock poisoned");
        if entries.len() >= self.capacity {
            entries.pop_front();
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(capacity = self.capacity, dropped, "reconcile log full, dropping oldest entry");
        }
        entries.push_back(entry);
    }

    pub(crate) fn note_read_failure(&self) {
        self.shadow_read_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_drift(&self, mismatches: u64) {
        self.drift_detected.fetch_add(mismatches, Ordering::Relaxed);
    }

    /// Take every pending entry, oldest first.
    pub fn drain(&self) -> Vec<ReconcileEntry> {
        self.entries
            .lock()
            .expect("reconcile log lock poisoned")
            .drain(..)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("reconcile log lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries lost to the capacity bound since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> DualWriteStats {
        DualWriteStats {
            shadow_write_failures: self.shadow_write_failures.load(Ordering::Relaxed),
            shadow_read_failures: self.shadow_read_failures.load(Ordering::Relaxed),
            drift_detected: self.drift_detected.load(Ordering::Relaxed),
        }
    }
}

impl Default for ReconcileLog {
    fn default() -> Self {
        Self::new(1024)
    }
}
