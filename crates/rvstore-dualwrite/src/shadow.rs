//! Best-effort access to the non-primary store.
//!
//! Everything here swallows failures (including panics) after logging and
//! recording them: the caller's outcome is decided by the primary alone.

use std::any::Any;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{error, warn};

use rvstore_storage::{Preconditions, Storage, StorageResult};
use rvstore_types::{ObjectKey, Resource, ResourceKind, ResourceVersion};

use crate::reconcile::{Operation, ReconcileLog};

/// Both stores plus the shared failure log.
#[derive(Clone)]
pub struct Backends {
    pub legacy: Arc<dyn Storage>,
    pub unified: Arc<dyn Storage>,
    pub log: Arc<ReconcileLog>,
}

/// Copy of a legacy object as it is written to the new store. Identity and
/// content are kept; the version is the new store's own business.
pub fn mirror(obj: &Resource) -> Resource {
    let mut copy = obj.clone();
    copy.metadata.resource_version = ResourceVersion::ZERO;
    copy.metadata.deletion_timestamp = None;
    copy
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Backends {
    /// Make the new store hold a mirror of `obj`, creating it if missing.
    /// Returns the new store's copy, or `None` if the write failed.
    pub async fn shadow_upsert(&self, operation: Operation, obj: &Resource) -> Option<Resource> {
        let key = obj.key();
        let desired = mirror(obj);
        let mut put = move |_: Resource| -> StorageResult<Resource> { Ok(desired.clone()) };
        let none = Preconditions::none();
        let write = self.unified.guaranteed_update(&key, &none, true, &mut put);
        match AssertUnwindSafe(write).catch_unwind().await {
            Ok(Ok(copy)) => Some(copy),
            Ok(Err(e)) => {
                warn!(%key, %operation, error = %e, "shadow write failed");
                self.log.record(operation, key.to_string(), e);
                None
            }
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                error!(%key, %operation, panic = %msg, "shadow write panicked");
                self.log.record(operation, key.to_string(), format!("panicked: {msg}"));
                None
            }
        }
    }

    /// Remove the new store's copy. A missing copy is not a failure.
    pub async fn shadow_delete(&self, key: &ObjectKey) -> Option<Resource> {
        let none = Preconditions::none();
        let delete = self.unified.delete(key, &none);
        match AssertUnwindSafe(delete).catch_unwind().await {
            Ok(Ok(gone)) => Some(gone),
            Ok(Err(e)) if e.is_not_found() => None,
            Ok(Err(e)) => {
                warn!(%key, error = %e, "shadow delete failed");
                self.log.record(Operation::Delete, key.to_string(), e);
                None
            }
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                error!(%key, panic = %msg, "shadow delete panicked");
                self.log
                    .record(Operation::Delete, key.to_string(), format!("panicked: {msg}"));
                None
            }
        }
    }

    /// Run a read against the non-primary store, turning errors and panics
    /// into `None`.
    pub async fn guarded_read<T, F>(&self, what: &'static str, read: F) -> Option<T>
    where
        F: Future<Output = StorageResult<T>> + Send,
    {
        match AssertUnwindSafe(read).catch_unwind().await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                self.log.note_read_failure();
                warn!(what, error = %e, "shadow read failed");
                None
            }
            Err(panic) => {
                self.log.note_read_failure();
                error!(what, panic = %panic_message(panic.as_ref()), "shadow read panicked");
                None
            }
        }
    }

    /// Compare two listings and log and count any mismatch.
    pub fn check_drift(&self, kind: &ResourceKind, primary: &[Resource], secondary: &[Resource]) -> Drift {
        let drift = Drift::between(primary, secondary);
        if !drift.is_empty() {
            warn!(
                kind = %kind,
                missing = ?drift.missing,
                unexpected = ?drift.unexpected,
                differing = ?drift.differing,
                "legacy and unified listings differ"
            );
            self.log.note_drift(drift.len() as u64);
        }
        drift
    }
}

/// Differences between a primary and a secondary listing, by
/// `namespace/name`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Drift {
    /// In the primary only.
    pub missing: Vec<String>,
    /// In the secondary only.
    pub unexpected: Vec<String>,
    /// In both, with different labels or body.
    pub differing: Vec<String>,
}

impl Drift {
    pub fn between(primary: &[Resource], secondary: &[Resource]) -> Self {
        fn index(items: &[Resource]) -> BTreeMap<String, &Resource> {
            items
                .iter()
                .map(|o| (format!("{}/{}", o.namespace().unwrap_or(""), o.name()), o))
                .collect()
        }
        let a = index(primary);
        let b = index(secondary);

        let mut drift = Self::default();
        for (name, pa) in &a {
            match b.get(name) {
                None => drift.missing.push(name.clone()),
                Some(pb) if pa.labels() != pb.labels() || pa.body != pb.body => {
                    drift.differing.push(name.clone())
                }
                Some(_) => {}
            }
        }
        drift.unexpected = b.keys().filter(|k| !a.contains_key(*k)).cloned().collect();
        drift
    }

    pub fn len(&self) -> usize {
        self.missing.len() + self.unexpected.len() + self.differing.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
