//! The storage contract shared by every backend.
//!
//! The file-backed engine, the in-memory store, the legacy adapter and the
//! dual writer all implement [`Storage`], which is why a dual writer can sit
//! in front of callers transparently.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use rvstore_types::{ObjectKey, Predicate, Resource, ResourceKind, ResourceVersion};

use crate::error::{StorageError, StorageResult};
use crate::watch::WatchStream;

/// Read-modify-write function passed to [`Storage::guaranteed_update`].
///
/// Receives the current object (or an empty object of the key when the
/// update is allowed to create) and returns the desired object. It may be
/// invoked more than once when the update is retried.
pub type UpdateFn<'a> = dyn FnMut(Resource) -> StorageResult<Resource> + Send + 'a;

/// Optimistic-concurrency preconditions for updates and deletes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Preconditions {
    pub uid: Option<String>,
    pub resource_version: Option<ResourceVersion>,
}

impl Preconditions {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn resource_version(rv: ResourceVersion) -> Self {
        Self {
            resource_version: Some(rv),
            ..Self::default()
        }
    }

    pub fn uid(uid: impl Into<String>) -> Self {
        Self {
            uid: Some(uid.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.uid.is_none() && self.resource_version.is_none()
    }

    /// Check the preconditions against the currently stored object.
    pub fn check(&self, key: &ObjectKey, current: &Resource) -> StorageResult<()> {
        if let Some(ref uid) = self.uid {
            if uid != current.uid() {
                return Err(StorageError::conflict(
                    key,
                    format!("precondition failed: uid is {}, expected {uid}", current.uid()),
                ));
            }
        }
        if let Some(rv) = self.resource_version {
            if rv != current.resource_version() {
                return Err(StorageError::conflict(
                    key,
                    format!(
                        "precondition failed: resourceVersion is {}, expected {rv}",
                        current.resource_version()
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// Parameters of a `list` or `delete_collection` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListOptions {
    pub kind: ResourceKind,
    pub predicate: Predicate,
}

impl ListOptions {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            predicate: Predicate::everything(),
        }
    }

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }

    /// Whether `obj` belongs to this listing.
    pub fn matches(&self, obj: &Resource) -> bool {
        same_kind(&self.kind, &obj.kind) && self.predicate.matches(obj)
    }
}

/// Objects of one kind are addressed by group and resource; the version is
/// a serialization detail of the stored copy.
pub fn same_kind(a: &ResourceKind, b: &ResourceKind) -> bool {
    a.group == b.group && a.resource == b.resource
}

/// A consistent snapshot plus the version it is valid at.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListResult {
    pub items: Vec<Resource>,
    /// Pass this to [`WatchOptions::resource_version`] to continue from the
    /// snapshot without gaps.
    pub resource_version: ResourceVersion,
}

/// Parameters of a `watch` call.
#[derive(Clone, Debug)]
pub struct WatchOptions {
    pub kind: ResourceKind,
    pub predicate: Predicate,
    /// Resume strictly after this version. Zero replays a full snapshot as
    /// `Added` events first.
    pub resource_version: ResourceVersion,
    /// Emit periodic bookmarks and the end-of-snapshot bookmark.
    pub allow_bookmarks: bool,
    /// Caller-scoped cancellation. The session ends when it fires.
    pub cancel: Option<CancellationToken>,
}

impl WatchOptions {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            predicate: Predicate::everything(),
            resource_version: ResourceVersion::ZERO,
            allow_bookmarks: false,
            cancel: None,
        }
    }

    pub fn from_version(mut self, rv: ResourceVersion) -> Self {
        self.resource_version = rv;
        self
    }

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn with_bookmarks(mut self) -> Self {
        self.allow_bookmarks = true;
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn list_options(&self) -> ListOptions {
        ListOptions {
            kind: self.kind.clone(),
            predicate: self.predicate.clone(),
        }
    }
}

/// Versioned, watchable object storage.
///
/// All implementations must satisfy these invariants:
/// - Every mutation is stamped with a `resourceVersion` strictly greater than
///   any previously issued by the same store.
/// - `uid` is assigned once at creation and never changes.
/// - A delete carries a final version greater than the last live one.
/// - A watch resumed from `V` observes exactly the changes after `V`, or
///   fails with [`StorageError::Expired`].
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store a new object. Fails with `AlreadyExists` if the key is taken.
    async fn create(&self, obj: Resource) -> StorageResult<Resource>;

    /// Read one object. Fails with `NotFound` if absent.
    async fn get(&self, key: &ObjectKey) -> StorageResult<Resource>;

    /// Read a consistent snapshot of all matching objects.
    async fn list(&self, opts: &ListOptions) -> StorageResult<ListResult>;

    /// Read-modify-write with precondition checks and bounded retry on
    /// concurrent modification.
    ///
    /// With `ignore_not_found`, a missing object is created from the result
    /// of `update` applied to [`Resource::empty`].
    async fn guaranteed_update(
        &self,
        key: &ObjectKey,
        preconditions: &Preconditions,
        ignore_not_found: bool,
        update: &mut UpdateFn<'_>,
    ) -> StorageResult<Resource>;

    /// Delete one object and return it stamped with its final version.
    async fn delete(&self, key: &ObjectKey, preconditions: &Preconditions) -> StorageResult<Resource>;

    /// Open a change feed.
    async fn watch(&self, opts: WatchOptions) -> StorageResult<WatchStream>;

    /// Delete every matching object. Objects that vanish concurrently are
    /// skipped.
    async fn delete_collection(
        &self,
        opts: &ListOptions,
        preconditions: &Preconditions,
    ) -> StorageResult<Vec<Resource>> {
        let listed = self.list(opts).await?;
        let mut deleted = Vec::with_capacity(listed.items.len());
        for obj in listed.items {
            match self.delete(&obj.key(), preconditions).await {
                Ok(gone) => deleted.push(gone),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(deleted)
    }

    /// Number of live objects of a kind, optionally within one namespace.
    async fn count(&self, kind: &ResourceKind, namespace: Option<&str>) -> StorageResult<usize> {
        let mut opts = ListOptions::new(kind.clone());
        opts.predicate.namespace = namespace.map(str::to_string);
        Ok(self.list(&opts).await?.items.len())
    }
}
