//! In-process change-feed fan-out.
//!
//! A [`WatchBroker`] is owned by a storage backend. Every committed mutation
//! is appended to a bounded ring buffer (for resume-from-version replay) and
//! pushed, without blocking, to each matching session's bounded queue. Each
//! session is drained by its own worker task, which forwards events to the
//! caller's [`WatchStream`] and injects periodic bookmarks.
//!
//! ```text
//! mutation path (commit lock held):
//!   publish() -> ring buffer -> try_send(session queue)   [never blocks]
//!                                       |
//! session worker task:                  v
//!   queue.recv() / bookmark tick -> out.send() -> WatchStream
//! ```
//!
//! Back-pressure contract: a session whose queue is full when an event is
//! published is removed from the fan-out set on the spot. Its worker drains
//! what was already queued, emits a terminal `Error(TooSlow)` event and exits.

pub mod broker;
pub mod session;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use broker::{WatchBroker, WatchFilter, WatchStart};
pub use session::WatchStream;

/// Tuning for the watch broker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Number of most recent events kept for resume-from-version replay.
    pub retention_events: usize,
    /// Events older than this are evicted even if the count allows them.
    pub retention_max_age_secs: Option<u64>,
    /// Per-session queue between the broker and the session worker.
    pub queue_capacity: usize,
    /// Interval between bookmarks for sessions that asked for them.
    pub bookmark_interval_ms: Option<u64>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            retention_events: 1000,
            retention_max_age_secs: None,
            queue_capacity: 100,
            bookmark_interval_ms: Some(60_000),
        }
    }
}

impl WatchConfig {
    pub fn retention_max_age(&self) -> Option<Duration> {
        self.retention_max_age_secs.map(Duration::from_secs)
    }

    pub fn bookmark_interval(&self) -> Option<Duration> {
        self.bookmark_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}
