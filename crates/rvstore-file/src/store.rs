use std::path::Path;
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use rvstore_storage::codec;
use rvstore_storage::mutation::{apply_update, prepare_create, prepare_update, stamp_deleted, validate_key};
use rvstore_storage::{
    ListOptions, ListResult, Preconditions, Storage, StorageError, StorageResult, UpdateFn,
    WatchBroker, WatchFilter, WatchOptions, WatchStart, WatchStream,
};
use rvstore_types::{ObjectKey, Resource, ResourceKind, ResourceVersion, WatchEvent};

use crate::allocator::ResourceVersionAllocator;
use crate::config::FileStoreConfig;
use crate::layout::Layout;

/// File-backed storage engine.
///
/// Every object is one JSON file; every mutation runs inside one commit
/// section covering version allocation, watermark persistence, the object
/// write and event publication. Reads of single objects do not take the
/// commit lock since object files are only ever replaced by rename.
pub struct FileStore {
    layout: Layout,
    allocator: ResourceVersionAllocator,
    broker: Arc<WatchBroker>,
    commit: Mutex<()>,
    config: FileStoreConfig,
    #[cfg(test)]
    fail_removes: AtomicBool,
}

impl FileStore {
    /// Open (or initialise) the store rooted at `config.root`.
    ///
    /// Fails if the watermark is corrupt, if any object file fails to
    /// decode, or if an object carries a version above the watermark.
    pub fn open(config: FileStoreConfig) -> StorageResult<Self> {
        let layout = Layout::new(&config.root);
        std::fs::create_dir_all(layout.root())?;
        let allocator = ResourceVersionAllocator::open(layout.watermark_path(), config.allocator.clone())?;
        let watermark = allocator.current();

        let scan = layout.scan()?;
        for tmp in &scan.temp_files {
            warn!(path = %tmp.display(), "removing leftover temp file");
            layout.remove(tmp)?;
        }
        for path in &scan.objects {
            let obj = read_object(&layout, path)?.ok_or_else(|| {
                StorageError::Internal(format!("{} vanished during open", path.display()))
            })?;
            if obj.resource_version() > watermark {
                return Err(StorageError::Corrupt {
                    location: path.display().to_string(),
                    reason: format!(
                        "resourceVersion {} is above the watermark {watermark}",
                        obj.resource_version()
                    ),
                });
            }
        }

        info!(
            root = %layout.root().display(),
            objects = scan.objects.len(),
            %watermark,
            "file store opened"
        );
        Ok(Self {
            broker: WatchBroker::new(config.watch.clone(), watermark),
            layout,
            allocator,
            commit: Mutex::new(()),
            config,
            #[cfg(test)]
            fail_removes: AtomicBool::new(false),
        })
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    pub fn config(&self) -> &FileStoreConfig {
        &self.config
    }

    pub fn broker(&self) -> &Arc<WatchBroker> {
        &self.broker
    }

    /// Latest version issued by this store.
    pub fn current_resource_version(&self) -> ResourceVersion {
        self.allocator.current()
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.commit.lock().expect("commit lock poisoned")
    }

    fn load(&self, key: &ObjectKey) -> StorageResult<Option<Resource>> {
        read_object(&self.layout, &self.layout.object_path(key))
    }

    fn persist(&self, obj: &Resource) -> StorageResult<()> {
        let bytes = codec::encode(obj)?;
        self.layout
            .write_atomic(&self.layout.object_path(&obj.key()), &bytes)
            .map_err(|e| StorageError::Internal(format!("write {}: {e}", obj.key())))
    }

    fn remove_object(&self, key: &ObjectKey) -> StorageResult<()> {
        #[cfg(test)]
        let refused = self.fail_removes.load(Ordering::SeqCst);
        #[cfg(not(test))]
        let refused = false;
        if refused {
            return Err(StorageError::Internal(format!("remove {key}: refused")));
        }
        self.layout
            .remove(&self.layout.object_path(key))
            .map(|_| ())
            .map_err(|e| StorageError::Internal(format!("remove {key}: {e}")))
    }

    /// Matching objects sorted by namespace then name. Caller holds the
    /// commit lock.
    fn scan(&self, opts: &ListOptions, _commit: &MutexGuard<'_, ()>) -> StorageResult<Vec<Resource>> {
        let mut items = Vec::new();
        for path in self.layout.object_files(&opts.kind, opts.predicate.namespace.as_deref())? {
            if let Some(obj) = read_object(&self.layout, &path)? {
                if opts.matches(&obj) {
                    items.push(obj);
                }
            }
        }
        items.sort_by(|a, b| (a.namespace(), a.name()).cmp(&(b.namespace(), b.name())));
        Ok(items)
    }

    fn insert_new(&self, obj: Resource) -> StorageResult<Resource> {
        let mut obj = prepare_create(obj)?;
        let key = obj.key();
        let _commit = self.lock();
        if self.load(&key)?.is_some() {
            return Err(StorageError::already_exists(&key));
        }
        obj.metadata.resource_version = self.allocator.next()?;
        self.persist(&obj)?;
        self.broker.publish(WatchEvent::Added(obj.clone()), None);
        debug!(%key, rv = %obj.resource_version(), "created");
        Ok(obj)
    }
}

fn read_object(layout: &Layout, path: &Path) -> StorageResult<Option<Resource>> {
    let bytes = layout
        .read(path)
        .map_err(|e| StorageError::Internal(format!("read {}: {e}", path.display())))?;
    bytes
        .map(|b| codec::decode(&b, &path.display().to_string()))
        .transpose()
}

#[async_trait]
impl Storage for FileStore {
    async fn create(&self, obj: Resource) -> StorageResult<Resource> {
        self.insert_new(obj)
    }

    async fn get(&self, key: &ObjectKey) -> StorageResult<Resource> {
        validate_key(key)?;
        self.load(key)?.ok_or_else(|| StorageError::not_found(key))
    }

    async fn list(&self, opts: &ListOptions) -> StorageResult<ListResult> {
        let commit = self.lock();
        let items = self.scan(opts, &commit)?;
        Ok(ListResult {
            items,
            resource_version: self.allocator.current(),
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
        let attempts = self.config.max_update_attempts.max(1);
        for attempt in 1..=attempts {
            let Some(current) = self.load(key)? else {
                if !ignore_not_found {
                    return Err(StorageError::not_found(key));
                }
                // A missing object only satisfies preconditions an empty one
                // would.
                preconditions.check(key, &Resource::empty(key))?;
                let mut fresh = apply_update(key, Resource::empty(key), update)?;
                fresh.metadata.resource_version = ResourceVersion::ZERO;
                match self.insert_new(fresh) {
                    Err(e) if e.is_already_exists() => {
                        debug!(%key, attempt, "created concurrently, retrying as update");
                        continue;
                    }
                    other => return other,
                }
            };
            preconditions.check(key, &current)?;

            let updated = apply_update(key, current.clone(), update)?;
            let Some(mut next) = prepare_update(key, &current, updated)? else {
                return Ok(current);
            };

            let _commit = self.lock();
            let seen = self.load(key)?.map(|o| o.resource_version());
            if seen != Some(current.resource_version()) {
                debug!(%key, attempt, "concurrent modification, retrying");
                continue;
            }
            next.metadata.resource_version = self.allocator.next()?;
            self.persist(&next)?;
            debug!(%key, rv = %next.resource_version(), "updated");
            self.broker.publish(WatchEvent::Modified(next.clone()), Some(current));
            return Ok(next);
        }
        warn!(%key, attempts, "update retry budget exhausted");
        Err(StorageError::conflict(
            key,
            format!("object kept changing; gave up after {attempts} attempts"),
        ))
    }

    async fn delete(&self, key: &ObjectKey, preconditions: &Preconditions) -> StorageResult<Resource> {
        validate_key(key)?;
        let _commit = self.lock();
        let current = self.load(key)?.ok_or_else(|| StorageError::not_found(key))?;
        preconditions.check(key, &current)?;

        // The file goes first: watchers must never hear of a delete that did
        // not happen.
        let gone = stamp_deleted(current.clone(), self.allocator.next()?);
        self.remove_object(key)?;
        self.broker.publish(WatchEvent::Deleted(gone.clone()), Some(current));
        debug!(%key, rv = %gone.resource_version(), "deleted");
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
        let commit = self.lock();
        let items = self.scan(&opts.list_options(), &commit)?;
        self.broker.subscribe(
            filter,
            WatchStart::Snapshot {
                items,
                resource_version: self.allocator.current(),
            },
            opts.allow_bookmarks,
            opts.cancel.as_ref(),
        )
    }

    async fn count(&self, kind: &ResourceKind, namespace: Option<&str>) -> StorageResult<usize> {
        let _commit = self.lock();
        Ok(self.layout.object_files(kind, namespace)?.len())
    }
}
