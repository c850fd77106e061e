//! # rvstore-file
//!
//! File-backed implementation of the rvstore storage contract.
//!
//! Objects are stored one JSON file per object under a directory tree, and
//! every mutation is stamped with a `resourceVersion` drawn from a
//! crash-safe watermark allocator. Changes are fanned out to watchers
//! through the shared [`rvstore_storage::WatchBroker`].
//!
//! ```no_run
//! use rvstore_file::{FileStore, FileStoreConfig};
//!
//! let store = FileStore::open(FileStoreConfig::new("/var/lib/rvstore"))?;
//! println!("watermark {}", store.current_resource_version());
//! # Ok::<(), rvstore_storage::StorageError>(())
//! ```

pub mod allocator;
pub mod config;
pub mod layout;
pub mod store;

pub use allocator::ResourceVersionAllocator;
pub use config::{AllocationStrategy, AllocatorConfig, FileStoreConfig};
pub use layout::Layout;
pub use store::FileStore;
