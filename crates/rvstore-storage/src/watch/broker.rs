use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use rvstore_types::{
    Predicate, Resource, ResourceKind, ResourceVersion, WatchEvent, INITIAL_EVENTS_END_ANNOTATION,
};

use super::session::{SessionWorker, WatchStream};
use super::WatchConfig;
use crate::error::{StorageError, StorageResult};
use crate::traits::same_kind;

/// What a session is interested in.
#[derive(Clone, Debug)]
pub struct WatchFilter {
    pub kind: ResourceKind,
    pub predicate: Predicate,
}

impl WatchFilter {
    pub fn new(kind: ResourceKind, predicate: Predicate) -> Self {
        Self { kind, predicate }
    }

    pub fn matches(&self, obj: &Resource) -> bool {
        same_kind(&self.kind, &obj.kind) && self.predicate.matches(obj)
    }

    /// Translate a committed change into what this session should observe.
    ///
    /// An update that moves an object into the selector is seen as `Added`,
    /// one that moves it out is seen as `Deleted`. `prev` is the object as it
    /// was before the change; without it a `Modified` is judged on the new
    /// state alone.
    pub fn project(&self, event: &WatchEvent, prev: Option<&Resource>) -> Option<WatchEvent> {
        match event {
            WatchEvent::Added(obj) | WatchEvent::Deleted(obj) => {
                self.matches(obj).then(|| event.clone())
            }
            WatchEvent::Modified(obj) => {
                let now = self.matches(obj);
                let before = prev.map_or(now, |p| self.matches(p));
                match (before, now) {
                    (true, true) => Some(event.clone()),
                    (false, true) => Some(WatchEvent::Added(obj.clone())),
                    (true, false) => Some(WatchEvent::Deleted(obj.clone())),
                    (false, false) => None,
                }
            }
            WatchEvent::Bookmark(_) | WatchEvent::Error(_) => Some(event.clone()),
        }
    }
}

/// Where a new session starts.
#[derive(Clone, Debug)]
pub enum WatchStart {
    /// Deliver `items` as `Added` events, then continue after
    /// `resource_version`. The caller must hold its commit lock so that no
    /// change lands between taking the snapshot and subscribing.
    Snapshot {
        items: Vec<Resource>,
        resource_version: ResourceVersion,
    },
    /// Replay retained events strictly after this version, then continue.
    Resume(ResourceVersion),
}

struct Retained {
    event: WatchEvent,
    prev: Option<Resource>,
    rv: ResourceVersion,
    at: Instant,
}

struct Subscriber {
    filter: WatchFilter,
    after: ResourceVersion,
    queue: mpsc::Sender<WatchEvent>,
    overflowed: Arc<AtomicBool>,
    cancel: CancellationToken,
}

struct BrokerState {
    retained: VecDeque<Retained>,
    /// Highest version evicted from `retained`; resumes below it are
    /// expired.
    floor: ResourceVersion,
    latest: ResourceVersion,
    subscribers: HashMap<u64, Subscriber>,
    next_id: u64,
}

/// Fan-out of committed changes to watch sessions, with a bounded replay
/// window.
pub struct WatchBroker {
    state: Mutex<BrokerState>,
    config: WatchConfig,
}

impl WatchBroker {
    /// A broker whose history begins at `floor`. Nothing at or below the
    /// floor can be replayed, so a store reopened at watermark `W` passes
    /// `W` here.
    pub fn new(config: WatchConfig, floor: ResourceVersion) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BrokerState {
                retained: VecDeque::with_capacity(config.retention_events.min(4096)),
                floor,
                latest: floor,
                subscribers: HashMap::new(),
                next_id: 1,
            }),
            config,
        })
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// Record a committed change and push it to every interested session.
    ///
    /// Never blocks. A session whose queue is full is dropped and will end
    /// with `Error(TooSlow)` once it has drained what it already holds.
    pub fn publish(&self, event: WatchEvent, prev: Option<Resource>) {
        let Some(rv) = event.resource_version() else {
            return;
        };
        let mut state = self.state.lock().expect("watch broker lock poisoned");
        if rv > state.latest {
            state.latest = rv;
        }

        prune(&mut state.subscribers);
        let mut dropped = Vec::new();
        for (id, sub) in &state.subscribers {
            if rv <= sub.after {
                continue;
            }
            let Some(projected) = sub.filter.project(&event, prev.as_ref()) else {
                continue;
            };
            match sub.queue.try_send(projected) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(session = id, %rv, kind = %sub.filter.kind, "watch session queue full, dropping");
                    sub.overflowed.store(true, Ordering::Release);
                    dropped.push(*id);
                }
                Err(TrySendError::Closed(_)) => dropped.push(*id),
            }
        }
        for id in dropped {
            state.subscribers.remove(&id);
        }

        state.retained.push_back(Retained {
            event,
            prev,
            rv,
            at: Instant::now(),
        });
        self.evict(&mut state);
    }

    fn evict(&self, state: &mut BrokerState) {
        while state.retained.len() > self.config.retention_events {
            if let Some(old) = state.retained.pop_front() {
                state.floor = state.floor.max(old.rv);
            }
        }
        if let Some(max_age) = self.config.retention_max_age() {
            while state
                .retained
                .front()
                .is_some_and(|r| r.at.elapsed() > max_age)
            {
                if let Some(old) = state.retained.pop_front() {
                    state.floor = state.floor.max(old.rv);
                }
            }
        }
    }

    /// Open a session. Must be called from within a tokio runtime.
    pub fn subscribe(
        self: &Arc<Self>,
        filter: WatchFilter,
        start: WatchStart,
        allow_bookmarks: bool,
        parent: Option<&CancellationToken>,
    ) -> StorageResult<WatchStream> {
        let mut state = self.state.lock().expect("watch broker lock poisoned");
        self.evict(&mut state);
        prune(&mut state.subscribers);

        let (initial, after) = match start {
            WatchStart::Snapshot {
                items,
                resource_version,
            } => {
                let mut initial: Vec<WatchEvent> = items
                    .into_iter()
                    .filter(|obj| filter.matches(obj))
                    .map(WatchEvent::Added)
                    .collect();
                if allow_bookmarks {
                    let end = Resource::bookmark(filter.kind.clone(), resource_version)
                        .with_annotation(INITIAL_EVENTS_END_ANNOTATION, "true");
                    initial.push(WatchEvent::Bookmark(end));
                }
                (initial, resource_version)
            }
            WatchStart::Resume(rv) => {
                if rv < state.floor {
                    return Err(StorageError::Expired {
                        requested: rv,
                        oldest: state.floor,
                    });
                }
                let replay = state
                    .retained
                    .iter()
                    .filter(|r| r.rv > rv)
                    .filter_map(|r| filter.project(&r.event, r.prev.as_ref()))
                    .collect();
                (replay, rv)
            }
        };

        let id = state.next_id;
        state.next_id += 1;
        let (queue_tx, queue_rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let (out_tx, out_rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let cancel = parent.map_or_else(CancellationToken::new, CancellationToken::child_token);
        let overflowed = Arc::new(AtomicBool::new(false));

        state.subscribers.insert(
            id,
            Subscriber {
                filter: filter.clone(),
                after,
                queue: queue_tx,
                overflowed: overflowed.clone(),
                cancel: cancel.clone(),
            },
        );
        drop(state);

        debug!(session = id, kind = %filter.kind, %after, replay = initial.len(), "watch session opened");

        let worker = SessionWorker {
            id,
            broker: Arc::clone(self),
            queue: queue_rx,
            out: out_tx,
            cancel: cancel.clone(),
            overflowed,
            initial,
            bookmark_interval: if allow_bookmarks {
                self.config.bookmark_interval()
            } else {
                None
            },
            last_rv: after,
        };
        tokio::spawn(worker.run());

        Ok(WatchStream::new(id, out_rx, cancel, Arc::downgrade(self)))
    }

    /// Queue a bookmark at the current watermark for one session.
    ///
    /// Enqueued under the broker lock, so it is ordered after every event
    /// already published.
    pub(crate) fn request_bookmark(&self, id: u64) {
        let state = self.state.lock().expect("watch broker lock poisoned");
        if let Some(sub) = state.subscribers.get(&id) {
            let bookmark = Resource::bookmark(sub.filter.kind.clone(), state.latest);
            // A full queue already guarantees the consumer will hear about
            // newer versions; skipping one bookmark loses nothing.
            let _ = sub.queue.try_send(WatchEvent::Bookmark(bookmark));
        }
    }

    pub fn unsubscribe(&self, id: u64) {
        let mut state = self.state.lock().expect("watch broker lock poisoned");
        if state.subscribers.remove(&id).is_some() {
            debug!(session = id, "watch session closed");
        }
    }

    /// Number of live sessions. Sessions whose token was cancelled or whose
    /// worker is gone are pruned from the fan-out set first.
    pub fn session_count(&self) -> usize {
        let mut state = self.state.lock().expect("watch broker lock poisoned");
        prune(&mut state.subscribers);
        state.subscribers.len()
    }

    /// Number of events currently available for replay.
    pub fn retained(&self) -> usize {
        self.state.lock().expect("watch broker lock poisoned").retained.len()
    }

    /// Lowest version a watch can resume from.
    pub fn floor(&self) -> ResourceVersion {
        self.state.lock().expect("watch broker lock poisoned").floor
    }

    /// Highest version published so far.
    pub fn latest(&self) -> ResourceVersion {
        self.state.lock().expect("watch broker lock poisoned").latest
    }
}

/// Drop sessions that can no longer receive: cancelled by their caller or
/// abandoned by their worker.
fn prune(subscribers: &mut HashMap<u64, Subscriber>) {
    subscribers.retain(|id, sub| {
        let live = !sub.cancel.is_cancelled() && !sub.queue.is_closed();
        if !live {
            debug!(session = id, "watch session pruned");
        }
        live
    });
}
