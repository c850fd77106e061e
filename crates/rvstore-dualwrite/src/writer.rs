use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use rvstore_storage::{
    ListOptions, ListResult, Preconditions, Storage, StorageResult, UpdateFn, WatchOptions, WatchStream,
};
use rvstore_types::{ObjectKey, Resource, ResourceKind};

use crate::config::DualWriterConfig;
use crate::mode::Mode;
use crate::mode1::LegacyMode;
use crate::mode2::DualLegacyMode;
use crate::mode3::DualUnifiedMode;
use crate::mode4::UnifiedMode;
use crate::reconcile::ReconcileLog;
use crate::shadow::Backends;

/// Storage front that routes each call to the legacy and/or new store
/// according to a migration [`Mode`] fixed at construction.
pub enum DualWriter {
    Legacy(LegacyMode),
    DualLegacy(DualLegacyMode),
    DualUnified(DualUnifiedMode),
    Unified(UnifiedMode),
}

impl DualWriter {
    pub fn new(
        mode: Mode,
        legacy: Arc<dyn Storage>,
        unified: Arc<dyn Storage>,
        log: Arc<ReconcileLog>,
    ) -> Self {
        match mode {
            Mode::Legacy => Self::Legacy(LegacyMode::new(legacy)),
            Mode::Unified => Self::Unified(UnifiedMode::new(unified)),
            Mode::DualLegacy => Self::DualLegacy(DualLegacyMode::new(Backends {
                legacy,
                unified,
                log,
            })),
            Mode::DualUnified => Self::DualUnified(DualUnifiedMode::new(Backends {
                legacy,
                unified,
                log,
            })),
        }
    }

    /// Build the writer for one kind using its configured mode.
    pub fn for_kind(
        config: &DualWriterConfig,
        kind: &ResourceKind,
        legacy: Arc<dyn Storage>,
        unified: Arc<dyn Storage>,
        log: Arc<ReconcileLog>,
    ) -> Self {
        let mode = config.mode_for(kind);
        info!(kind = %kind.group_resource(), %mode, "dual writer configured");
        Self::new(mode, legacy, unified, log)
    }

    pub fn mode(&self) -> Mode {
        match self {
            Self::Legacy(_) => Mode::Legacy,
            Self::DualLegacy(_) => Mode::DualLegacy,
            Self::DualUnified(_) => Mode::DualUnified,
            Self::Unified(_) => Mode::Unified,
        }
    }

    fn handler(&self) -> &dyn Storage {
        match self {
            Self::Legacy(h) => h,
            Self::DualLegacy(h) => h,
            Self::DualUnified(h) => h,
            Self::Unified(h) => h,
        }
    }
}

#[async_trait]
impl Storage for DualWriter {
    async fn create(&self, obj: Resource) -> StorageResult<Resource> {
        self.handler().create(obj).await
    }

    async fn get(&self, key: &ObjectKey) -> StorageResult<Resource> {
        self.handler().get(key).await
    }

    async fn list(&self, opts: &ListOptions) -> StorageResult<ListResult> {
        self.handler().list(opts).await
    }

    async fn guaranteed_update(
        &self,
        key: &ObjectKey,
        preconditions: &Preconditions,
        ignore_not_found: bool,
        update: &mut UpdateFn<'_>,
    ) -> StorageResult<Resource> {
        self.handler()
            .guaranteed_update(key, preconditions, ignore_not_found, update)
            .await
    }

    async fn delete(&self, key: &ObjectKey, preconditions: &Preconditions) -> StorageResult<Resource> {
        self.handler().delete(key, preconditions).await
    }

    async fn watch(&self, opts: WatchOptions) -> StorageResult<WatchStream> {
        self.handler().watch(opts).await
    }

    async fn delete_collection(
        &self,
        opts: &ListOptions,
        preconditions: &Preconditions,
    ) -> StorageResult<Vec<Resource>> {
        self.handler().delete_collection(opts, preconditions).await
    }

    async fn count(&self, kind: &ResourceKind, namespace: Option<&str>) -> StorageResult<usize> {
        self.handler().count(kind, namespace).await
    }
}
