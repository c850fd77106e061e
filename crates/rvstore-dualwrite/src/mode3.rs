use async_trait::async_trait;
use tracing::debug;

use rvstore_storage::{
    ListOptions, ListResult, Preconditions, Storage, StorageError, StorageResult, UpdateFn,
    WatchOptions, WatchStream,
};
use rvstore_types::{ObjectKey, Resource, ResourceKind};

use crate::reconcile::Operation;
use crate::shadow::Backends;

/// Mode 3: the new store serves reads; writes still land in legacy first so
/// that a rollback to mode 2 loses nothing.
pub struct DualUnifiedMode {
    backends: Backends,
}

impl DualUnifiedMode {
    pub fn new(backends: Backends) -> Self {
        Self { backends }
    }

    /// Check the caller's preconditions against the copy it could have read
    /// (the new one, else legacy's) and translate them for legacy.
    ///
    /// Legacy's version is taken before the check and pinned in the returned
    /// preconditions, so a legacy write that lands in between turns ours into
    /// a `Conflict` instead of silently overwriting it. Uids are mirrored and
    /// forwarded as is.
    async fn check_preconditions(
        &self,
        key: &ObjectKey,
        preconditions: &Preconditions,
        ignore_not_found: bool,
    ) -> StorageResult<Preconditions> {
        if preconditions.is_empty() {
            return Ok(Preconditions::none());
        }
        let legacy_current = match self.backends.legacy.get(key).await {
            Ok(obj) => Some(obj),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };
        let visible = match self.backends.unified.get(key).await {
            Ok(obj) => Some(obj),
            Err(e) if e.is_not_found() => legacy_current.clone(),
            Err(e) => return Err(e),
        };
        match visible {
            Some(current) => preconditions.check(key, &current)?,
            None if !ignore_not_found => return Err(StorageError::not_found(key)),
            None => {}
        }
        Ok(Preconditions {
            uid: preconditions.uid.clone(),
            resource_version: legacy_current.map(|obj| obj.resource_version()),
        })
    }
}

#[async_trait]
impl Storage for DualUnifiedMode {
    async fn create(&self, obj: Resource) -> StorageResult<Resource> {
        let created = self.backends.legacy.create(obj).await?;
        Ok(self
            .backends
            .shadow_upsert(Operation::Create, &created)
            .await
            .unwrap_or(created))
    }

    async fn get(&self, key: &ObjectKey) -> StorageResult<Resource> {
        match self.backends.unified.get(key).await {
            Err(e) if e.is_not_found() => {
                debug!(%key, "not in unified store, falling back to legacy");
                self.backends
                    .guarded_read("get", self.backends.legacy.get(key))
                    .await
                    .ok_or(e)
            }
            other => other,
        }
    }

    async fn list(&self, opts: &ListOptions) -> StorageResult<ListResult> {
        let primary = self.backends.unified.list(opts).await?;
        if let Some(shadow) = self
            .backends
            .guarded_read("list", self.backends.legacy.list(opts))
            .await
        {
            self.backends.check_drift(&opts.kind, &primary.items, &shadow.items);
        }
        Ok(primary)
    }

    async fn guaranteed_update(
        &self,
        key: &ObjectKey,
        preconditions: &Preconditions,
        ignore_not_found: bool,
        update: &mut UpdateFn<'_>,
    ) -> StorageResult<Resource> {
        let legacy_pre = self
            .check_preconditions(key, preconditions, ignore_not_found)
            .await?;
        let updated = self
            .backends
            .legacy
            .guaranteed_update(key, &legacy_pre, ignore_not_found, update)
            .await?;
        Ok(self
            .backends
            .shadow_upsert(Operation::Update, &updated)
            .await
            .unwrap_or(updated))
    }

    async fn delete(&self, key: &ObjectKey, preconditions: &Preconditions) -> StorageResult<Resource> {
        let legacy_pre = self.check_preconditions(key, preconditions, false).await?;
        let gone = self.backends.legacy.delete(key, &legacy_pre).await?;
        Ok(self.backends.shadow_delete(key).await.unwrap_or(gone))
    }

    async fn watch(&self, opts: WatchOptions) -> StorageResult<WatchStream> {
        self.backends.unified.watch(opts).await
    }

    async fn delete_collection(
        &self,
        opts: &ListOptions,
        preconditions: &Preconditions,
    ) -> StorageResult<Vec<Resource>> {
        let legacy_pre = Preconditions {
            uid: preconditions.uid.clone(),
            resource_version: None,
        };
        let gone = self.backends.legacy.delete_collection(opts, &legacy_pre).await?;
        let mut out = Vec::with_capacity(gone.len());
        for obj in gone {
            let key = obj.key();
            out.push(self.backends.shadow_delete(&key).await.unwrap_or(obj));
        }
        Ok(out)
    }

    async fn count(&self, kind: &ResourceKind, namespace: Option<&str>) -> StorageResult<usize> {
        self.backends.unified.count(kind, namespace).await
    }
}
