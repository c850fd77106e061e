use async_trait::async_trait;
use tracing::debug;

use rvstore_storage::{
    ListOptions, ListResult, Preconditions, Storage, StorageResult, UpdateFn, WatchOptions, WatchStream,
};
use rvstore_types::{ObjectKey, Resource, ResourceKind};

use crate::reconcile::Operation;
use crate::shadow::Backends;

/// Mode 2: legacy is authoritative, the new store is written best-effort
/// and consulted only to detect drift on List.
pub struct DualLegacyMode {
    backends: Backends,
}

impl DualLegacyMode {
    pub fn new(backends: Backends) -> Self {
        Self { backends }
    }
}

#[async_trait]
impl Storage for DualLegacyMode {
    async fn create(&self, obj: Resource) -> StorageResult<Resource> {
        let created = self.backends.legacy.create(obj).await?;
        self.backends.shadow_upsert(Operation::Create, &created).await;
        Ok(created)
    }

    async fn get(&self, key: &ObjectKey) -> StorageResult<Resource> {
        self.backends.legacy.get(key).await
    }

    async fn list(&self, opts: &ListOptions) -> StorageResult<ListResult> {
        let primary = self.backends.legacy.list(opts).await?;
        if let Some(shadow) = self
            .backends
            .guarded_read("list", self.backends.unified.list(opts))
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
        let updated = self
            .backends
            .legacy
            .guaranteed_update(key, preconditions, ignore_not_found, update)
            .await?;
        self.backends.shadow_upsert(Operation::Update, &updated).await;
        Ok(updated)
    }

    async fn delete(&self, key: &ObjectKey, preconditions: &Preconditions) -> StorageResult<Resource> {
        let gone = self.backends.legacy.delete(key, preconditions).await?;
        if self.backends.shadow_delete(key).await.is_none() {
            debug!(%key, "no shadow copy deleted");
        }
        Ok(gone)
    }

    async fn watch(&self, opts: WatchOptions) -> StorageResult<WatchStream> {
        self.backends.legacy.watch(opts).await
    }

    async fn delete_collection(
        &self,
        opts: &ListOptions,
        preconditions: &Preconditions,
    ) -> StorageResult<Vec<Resource>> {
        let gone = self.backends.legacy.delete_collection(opts, preconditions).await?;
        for obj in &gone {
            self.backends.shadow_delete(&obj.key()).await;
        }
        Ok(gone)
    }

    async fn count(&self, kind: &ResourceKind, namespace: Option<&str>) -> StorageResult<usize> {
        self.backends.legacy.count(kind, namespace).await
    }
}
