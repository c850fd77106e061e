use std::sync::Arc;

use async_trait::async_trait;

use rvstore_storage::{
    ListOptions, ListResult, Preconditions, Storage, StorageResult, UpdateFn, WatchOptions, WatchStream,
};
use rvstore_types::{ObjectKey, Resource, ResourceKind};

/// Mode 1: the legacy store only. The new store is never touched.
pub struct LegacyMode {
    legacy: Arc<dyn Storage>,
}

impl LegacyMode {
    pub fn new(legacy: Arc<dyn Storage>) -> Self {
        Self { legacy }
    }
}

#[async_trait]
impl Storage for LegacyMode {
    async fn create(&self, obj: Resource) -> StorageResult<Resource> {
        self.legacy.create(obj).await
    }

    async fn get(&self, key: &ObjectKey) -> StorageResult<Resource> {
        self.legacy.get(key).await
    }

    async fn list(&self, opts: &ListOptions) -> StorageResult<ListResult> {
        self.legacy.list(opts).await
    }

    async fn guaranteed_update(
        &self,
        key: &ObjectKey,
        preconditions: &Preconditions,
        ignore_not_found: bool,
        update: &mut UpdateFn<'_>,
    ) -> StorageResult<Resource> {
        self.legacy
            .guaranteed_update(key, preconditions, ignore_not_found, update)
            .await
    }

    async fn delete(&self, key: &ObjectKey, preconditions: &Preconditions) -> StorageResult<Resource> {
        self.legacy.delete(key, preconditions).await
    }

    async fn watch(&self, opts: WatchOptions) -> StorageResult<WatchStream> {
        self.legacy.watch(opts).await
    }

    async fn delete_collection(
        &self,
        opts: &ListOptions,
        preconditions: &Preconditions,
    ) -> StorageResult<Vec<Resource>> {
        self.legacy.delete_collection(opts, preconditions).await
    }

    async fn count(&self, kind: &ResourceKind, namespace: Option<&str>) -> StorageResult<usize> {
        self.legacy.count(kind, namespace).await
    }
}
