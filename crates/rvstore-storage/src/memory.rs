//! In-memory [`Storage`] backend.
//!
//! Used as the legacy store in tests and demos, and as a reference for the
//! contract. Versions come from a plain counter and nothing survives a
//! restart.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use rvstore_types::{ObjectKey, Resource, ResourceKind, ResourceVersion, WatchEvent};

use crate::error::{StorageError, StorageResult};
use crate::mutation::{apply_update, prepare_create, prepare_update, stamp_deleted, validate_key};
use crate::traits::{ListOptions, ListResult, Preconditions, Storage, UpdateFn, WatchOptions};
use crate::watch::{WatchBroker, WatchConfig, WatchFilter, WatchStart, WatchStream};

/// Version-independent identity of a stored object.
type SlotKey = (String, String, Option<String>, String);

fn slot(key: &ObjectKey) -> SlotKey {
    (
        key.kind.group.clone(),
        key.kind.resource.clone(),
        key.namespace.clone(),
        key.name.clone(),
    )
}

#[derive(Default)]
struct MemoryState {
    objects: BTreeMap<SlotKey, Resource>,
    rv: u64,
}

impl MemoryState {
    fn next_rv(&mut self) -> ResourceVersion {
        self.rv += 1;
        ResourceVersion::new(self.rv)
    }
}

/// Volatile store with the full storage contract.
pub struct InMemoryStorage {
    state: Mutex<MemoryState>,
    broker: Arc<WatchBroker>,
    max_update_attempts: usize,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::with_config(WatchConfig::default())
    }

    pub fn with_config(watch: WatchConfig) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            broker: WatchBroker::new(watch, ResourceVersion::ZERO),
            max_update_attempts: 5,
        }
    }

    pub fn broker(&self) -> &Arc<WatchBroker> {
        &self.broker
    }

    /// Last version issued.
    pub fn current_resource_version(&self) -> ResourceVersion {
        ResourceVersion::new(self.state.lock().expect("memory store lock poisoned").rv)
    }

    fn snapshot(&self, key: &ObjectKey) -> Option<Resource> {
        let state = self.state.lock().expect("memory store lock poisoned");
        state.objects.get(&slot(key)).cloned()
    }

    fn insert_new(&self, obj: Resource) -> StorageResult<Resource> {
        let mut obj = prepare_create(obj)?;
        let key = obj.key();
        let mut state = self.state.lock().expect("memory store lock poisoned");
        if state.objects.contains_key(&slot(&key)) {
            return Err(StorageError::already_exists(&key));
        }
        obj.metadata.resource_version = state.next_rv();
        state.objects.insert(slot(&key), obj.clone());
        self.broker.publish(WatchEvent::Added(obj.clone()), None);
        debug!(%key, rv = %obj.resource_version(), "created");
        Ok(obj)
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn create(&self, obj: Resource) -> StorageResult<Resource> {
        self.insert_new(obj)
    }

    async fn get(&self, key: &ObjectKey) -> StorageResult<Resource> {
        validate_key(key)?;
        self.snapshot(key).ok_or_else(|| StorageError::not_found(key))
    }

    async fn list(&self, opts: &ListOptions) -> StorageResult<ListResult> {
        let state = self.state.lock().expect("memory store lock poisoned");
        let items = state
            .objects
            .values()
            .filter(|o| opts.matches(o))
            .cloned()
            .collect();
        Ok(ListResult {
            items,
            resource_version: ResourceVersion::new(state.rv),
        })
    }

    async fn guaranteed_update(
        &self,
        key: &ObjectKey,
        preconditions: &Preconditions,
        ignore_not_found: bool,
        update: &mut UpdateFn<'_>,
    ) -> StorageResult<Resource> {
        validate_key(key)?;
        for attempt in 1..=self.max_update_attempts {
            let Some(current) = self.snapshot(key) else {
                if !ignore_not_found {
                    return Err(StorageError::not_found(key));
                }
                preconditions.check(key, &Resource::empty(key))?;
                let mut fresh = apply_update(key, Resource::empty(key), update)?;
                fresh.metadata.resource_version = ResourceVersion::ZERO;
                match self.insert_new(fresh) {
                    Err(e) if e.is_already_exists() => continue,
                    other => return other,
                }
            };
            preconditions.check(key, &current)?;
            let seen = current.resource_version();
            let Some(mut next) = prepare_update(key, &current, apply_update(key, current.clone(), update)?)?
            else {
                return Ok(current);
            };

            let mut state = self.state.lock().expect("memory store lock poisoned");
            let still = state.objects.get(&slot(key)).map(Resource::resource_version);
            if still != Some(seen) {
                debug!(%key, attempt, "concurrent modification, retrying");
                continue;
            }
            next.metadata.resource_version = state.next_rv();
            state.objects.insert(slot(key), next.clone());
            self.broker.publish(WatchEvent::Modified(next.clone()), Some(current));
            return Ok(next);
        }
        Err(StorageError::conflict(
            key,
            format!("gave up after {} attempts", self.max_update_attempts),
        ))
    }

    async fn delete(&self, key: &ObjectKey, preconditions: &Preconditions) -> StorageResult<Resource> {
        validate_key(key)?;
        let mut state = self.state.lock().expect("memory store lock poisoned");
        let current = state
            .objects
            .get(&slot(key))
            .cloned()
            .ok_or_else(|| StorageError::not_found(key))?;
        preconditions.check(key, &current)?;
        let rv = state.next_rv();
        state.objects.remove(&slot(key));
        let gone = stamp_deleted(current.clone(), rv);
        self.broker.publish(WatchEvent::Deleted(gone.clone()), Some(current));
        Ok(gone)
    }

    async fn watch(&self, opts: WatchOptions) -> StorageResult<WatchStream> {
        let filter = WatchFilter::new(opts.kind.clone(), opts.predicate.clone());
        if !opts.resource_version.is_zero() {
            return self.broker.subscribe(
                filter,
                WatchStart::Resume(opts.resource_version),
                opts.allow_bookmarks,
                opts.cancel.as_ref(),
            );
        }
        // Holding the state lock keeps writers out between the snapshot and
        // the registration.
        let state = self.state.lock().expect("memory store lock poisoned");
        let list = opts.list_options();
        let items = state.objects.values().filter(|o| list.matches(o)).cloned().collect();
        self.broker.subscribe(
            filter,
            WatchStart::Snapshot {
                items,
                resource_version: ResourceVersion::new(state.rv),
            },
            opts.allow_bookmarks,
            opts.cancel.as_ref(),
        )
    }

    async fn count(&self, kind: &ResourceKind, namespace: Option<&str>) -> StorageResult<usize> {
        let state = self.state.lock().expect("memory store lock poisoned");
        Ok(state
            .objects
            .values()
            .filter(|o| {
                crate::traits::same_kind(&o.kind, kind)
                    && namespace.map_or(true, |ns| o.namespace() == Some(ns))
            })
            .count())
    }
}
