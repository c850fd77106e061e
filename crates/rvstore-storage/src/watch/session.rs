use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use rvstore_types::{
    ResourceVersion, StatusReason, WatchEvent, WatchStatus, INITIAL_EVENTS_END_ANNOTATION,
};

use super::broker::WatchBroker;

/// Consumer end of a watch session.
///
/// Dropping the stream, calling [`WatchStream::stop`], or cancelling the
/// token passed in the watch options all end the session. After that,
/// `recv` returns `None`.
pub struct WatchStream {
    id: u64,
    events: mpsc::Receiver<WatchEvent>,
    cancel: CancellationToken,
    broker: Weak<WatchBroker>,
}

impl WatchStream {
    pub(crate) fn new(
        id: u64,
        events: mpsc::Receiver<WatchEvent>,
        cancel: CancellationToken,
        broker: Weak<WatchBroker>,
    ) -> Self {
        Self {
            id,
            events,
            cancel,
            broker,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event, or `None` once the session has ended. An `Error` event is
    /// always the last one delivered.
    pub async fn recv(&mut self) -> Option<WatchEvent> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            ev = self.events.recv() => ev,
        }
    }

    /// End the session. Idempotent.
    pub fn stop(&mut self) {
        if !self.cancel.is_cancelled() {
            self.cancel.cancel();
        }
        self.events.close();
        if let Some(broker) = self.broker.upgrade() {
            broker.unsubscribe(self.id);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for WatchStream {
    fn drop(&mut self) {
        self.stop();
    }
}

impl futures::Stream for WatchStream {
    type Item = WatchEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        self.events.poll_recv(cx)
    }
}

impl std::fmt::Debug for WatchStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchStream")
            .field("id", &self.id)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Drains one session's broker queue into its consumer channel.
pub(crate) struct SessionWorker {
    pub(crate) id: u64,
    pub(crate) broker: Arc<WatchBroker>,
    pub(crate) queue: mpsc::Receiver<WatchEvent>,
    pub(crate) out: mpsc::Sender<WatchEvent>,
    pub(crate) cancel: CancellationToken,
    pub(crate) overflowed: Arc<AtomicBool>,
    pub(crate) initial: Vec<WatchEvent>,
    pub(crate) bookmark_interval: Option<Duration>,
    /// Highest version handed to the consumer.
    pub(crate) last_rv: ResourceVersion,
}

impl SessionWorker {
    pub(crate) async fn run(mut self) {
        let initial = std::mem::take(&mut self.initial);
        let mut open = true;
        for ev in initial {
            if !self.deliver(ev).await {
                open = false;
                break;
            }
        }

        let mut ticker = self.bookmark_interval.map(|period| {
            let mut t = interval_at(Instant::now() + period, period);
            t.set_missed_tick_behavior(MissedTickBehavior::Delay);
            t
        });

        while open {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                ev = self.queue.recv() => match ev {
                    Some(ev) => open = self.deliver(ev).await,
                    None => {
                        if self.overflowed.load(Ordering::Acquire) {
                            let status = WatchStatus::new(
                                StatusReason::TooSlow,
                                "watch consumer fell behind; list and watch again",
                            );
                            let _ = self.deliver(WatchEvent::Error(status)).await;
                        }
                        break;
                    }
                },
                _ = tick(&mut ticker) => self.broker.request_bookmark(self.id),
            }
        }

        self.broker.unsubscribe(self.id);
        debug!(session = self.id, last_rv = %self.last_rv, "watch session worker exited");
    }

    /// Forward one event. Returns `false` when the consumer is gone.
    async fn deliver(&mut self, ev: WatchEvent) -> bool {
        if let WatchEvent::Bookmark(ref obj) = ev {
            let closes_snapshot = obj
                .metadata
                .annotations
                .contains_key(INITIAL_EVENTS_END_ANNOTATION);
            if !closes_snapshot && obj.resource_version() <= self.last_rv {
                return true;
            }
        }
        if let Some(rv) = ev.resource_version() {
            self.last_rv = self.last_rv.max(rv);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.out.send(ev) => sent.is_ok(),
        }
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
