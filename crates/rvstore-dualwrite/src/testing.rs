//! Storage doubles for routing tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Barrier;

use rvstore_storage::{
    ListOptions, ListResult, Preconditions, Storage, StorageError, StorageResult, UpdateFn,
    WatchOptions, WatchStream,
};
use rvstore_types::{ObjectKey, Resource, ResourceKind};

/// Forwards to an inner store and counts calls.
pub struct Counting<S> {
    inner: S,
    calls: AtomicUsize,
    lists: AtomicUsize,
    writes: AtomicUsize,
}

impl<S: Storage> Counting<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
            lists: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// The wrapped store, for assertions that must not count as calls.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn lists(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn write(&self) {
        self.hit();
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl<S: Storage> Storage for Counting<S> {
    async fn create(&self, obj: Resource) -> StorageResult<Resource> {
        self.write();
        self.inner.create(obj).await
    }

    async fn get(&self, key: &ObjectKey) -> StorageResult<Resource> {
        self.hit();
        self.inner.get(key).await
    }

    async fn list(&self, opts: &ListOptions) -> StorageResult<ListResult> {
        self.hit();
        self.lists.fetch_add(1, Ordering::SeqCst);
        self.inner.list(opts).await
    }

    async fn guaranteed_update(
        &self,
        key: &ObjectKey,
        preconditions: &Preconditions,
        ignore_not_found: bool,
        update: &mut UpdateFn<'_>,
    ) -> StorageResult<Resource> {
        self.write();
        self.inner
            .guaranteed_update(key, preconditions, ignore_not_found, update)
            .await
    }

    async fn delete(&self, key: &ObjectKey, preconditions: &Preconditions) -> StorageResult<Resource> {
        self.write();
        self.inner.delete(key, preconditions).await
    }

    async fn watch(&self, opts: WatchOptions) -> StorageResult<WatchStream> {
        self.hit();
        self.inner.watch(opts).await
    }

    async fn delete_collection(
        &self,
        opts: &ListOptions,
        preconditions: &Preconditions,
    ) -> StorageResult<Vec<Resource>> {
        self.write();
        self.inner.delete_collection(opts, preconditions).await
    }

    async fn count(&self, kind: &ResourceKind, namespace: Option<&str>) -> StorageResult<usize> {
        self.hit();
        self.inner.count(kind, namespace).await
    }
}

/// Holds the result of the first `parties` gets until that many callers
/// have read, so concurrent writers all act on the same snapshot.
pub struct Gated<S> {
    inner: S,
    barrier: Arc<Barrier>,
    remaining: AtomicUsize,
}

impl<S: Storage> Gated<S> {
    pub fn new(inner: S, parties: usize) -> Self {
        Self {
            inner,
            barrier: Arc::new(Barrier::new(parties)),
            remaining: AtomicUsize::new(parties),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: Storage> Storage for Gated<S> {
    async fn create(&self, obj: Resource) -> StorageResult<Resource> {
        self.inner.create(obj).await
    }

    async fn get(&self, key: &ObjectKey) -> StorageResult<Resource> {
        let result = self.inner.get(key).await;
        let gated = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if gated {
            self.barrier.wait().await;
        }
        result
    }

    async fn list(&self, opts: &ListOptions) -> StorageResult<ListResult> {
        self.inner.list(opts).await
    }

    async fn guaranteed_update(
        &self,
        key: &ObjectKey,
        preconditions: &Preconditions,
        ignore_not_found: bool,
        update: &mut UpdateFn<'_>,
    ) -> StorageResult<Resource> {
        self.inner
            .guaranteed_update(key, preconditions, ignore_not_found, update)
            .await
    }

    async fn delete(&self, key: &ObjectKey, preconditions: &Preconditions) -> StorageResult<Resource> {
        self.inner.delete(key, preconditions).await
    }

    async fn watch(&self, opts: WatchOptions) -> StorageResult<WatchStream> {
        self.inner.watch(opts).await
    }
}

/// A store that fails every call, either with `Internal` or by panicking.
pub struct Faulty {
    panic: bool,
}

impl Faulty {
    pub fn failing() -> Self {
        Self { panic: false }
    }

    pub fn panicking() -> Self {
        Self { panic: true }
    }

    fn fail<T>(&self, op: &str) -> StorageResult<T> {
        if self.panic {
            panic!("{op} exploded");
        }
        Err(StorageError::Internal(format!("{op}: backend unavailable")))
    }
}

#[async_trait]
impl Storage for Faulty {
    async fn create(&self, _obj: Resource) -> StorageResult<Resource> {
        self.fail("create")
    }

    async fn get(&self, _key: &ObjectKey) -> StorageResult<Resource> {
        self.fail("get")
    }

    async fn list(&self, _opts: &ListOptions) -> StorageResult<ListResult> {
        self.fail("list")
    }

    async fn guaranteed_update(
        &self,
        _key: &ObjectKey,
        _preconditions: &Preconditions,
        _ignore_not_found: bool,
        _update: &mut UpdateFn<'_>,
    ) -> StorageResult<Resource> {
        self.fail("update")
    }

    async fn delete(&self, _key: &ObjectKey, _preconditions: &Preconditions) -> StorageResult<Resource> {
        self.fail("delete")
    }

    async fn watch(&self, _opts: WatchOptions) -> StorageResult<WatchStream> {
        self.fail("watch")
    }
}
