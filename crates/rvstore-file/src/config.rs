use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use rvstore_storage::WatchConfig;

/// How the allocator picks the next version.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AllocationStrategy {
    /// `last + 1`.
    Counter,
    /// `max(last + 1, now in microseconds)`: versions double as timestamps.
    #[default]
    WallClock,
}

/// Resource version allocator settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    pub strategy: AllocationStrategy,
    /// Versions reserved per watermark write. `1` persists on every
    /// allocation.
    pub lease_size: u64,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            strategy: AllocationStrategy::default(),
            lease_size: 1,
        }
    }
}

/// Settings of a [`FileStore`](crate::FileStore).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileStoreConfig {
    /// Directory owned by the store.
    pub root: PathBuf,
    pub allocator: AllocatorConfig,
    pub watch: WatchConfig,
    /// Read-mutate-write attempts before `guaranteed_update` gives up.
    pub max_update_attempts: usize,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./rvstore-data"),
            allocator: AllocatorConfig::default(),
            watch: WatchConfig::default(),
            max_update_attempts: 5,
        }
    }
}

impl FileStoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }
}
