use std::sync::Arc;

use async_trait::async_trait;

use rvstore_storage::{
    ListOptions, ListResult, Preconditions, Storage, StorageResult, UpdateFn, WatchOptions, WatchStream,
};
use rvstore_types::{ObjectKey, Resource, ResourceKind};

/// Mode 4: migration finished. Legacy receives no calls at all.
pub struct UnifiedMode {
    unified: Arc<dyn Storage>,
}

impl UnifiedMode {
    pub fn new(unified: Arc<dyn Storage>) -> Self {
        Self { unified }
    }
}

#[async_trait]
impl Storage for UnifiedMode {
    async fn create(&self, obj: Resource) -> StorageResult<Resource> {
        self.unified.create(obj).await
    }

    async fn get(&self, key: &ObjectKey) -> StorageResult<Resource> {
        self.unified.get(key).await
    }

    async fn list(&self, opts: &ListOptions) -> StorageResult<ListResult> {
        self.unified.list(opts).await
    }

    async fn guaranteed_update(
        &self,
        key: &ObjectKey,
        preconditions: &Preconditions,
        ignore_not_found: bool,
        update: &mut UpdateFn<'_>,
    ) -> StorageResult<Resource> {
        self.unified
            .guaranteed_update(key, preconditions, ignore_not_found, update)
            .await
    }

    async fn delete(&self, key: &ObjectKey, preconditions: &Preconditions) -> StorageResult<Resource> {
        self.unified.delete(key, preconditions).await
    }

    async fn watch(&self, opts: WatchOptions) -> StorageResult<WatchStream> {
        self.unified.watch(opts).await
    }

    async fn delete_collection(
        &self,
        opts: &ListOptions,
        preconditions: &Preconditions,
    ) -> StorageResult<Vec<Resource>> {
        self.unified.delete_collection(opts, preconditions).await
    }

    async fn count(&self, kind: &ResourceKind, namespace: Option<&str>) -> StorageResult<usize> {
        self.unified.count(kind, namespace).await
    }
}
