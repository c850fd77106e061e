//! # rvstore-storage
//!
//! The storage contract of rvstore and the pieces every backend shares.
//!
//! - [`Storage`]: the async trait implemented by the file-backed engine, the
//!   in-memory store and the dual writer
//! - [`codec`]: the JSON envelope objects are persisted in
//! - [`watch`]: the change-feed broker with bounded replay and per-session
//!   back-pressure
//! - [`InMemoryStorage`]: a volatile backend with the full contract

pub mod codec;
pub mod error;
pub mod memory;
pub mod mutation;
pub mod traits;
pub mod watch;

pub use error::{StorageError, StorageResult};
pub use memory::InMemoryStorage;
pub use traits::{
    same_kind, ListOptions, ListResult, Preconditions, Storage, UpdateFn, WatchOptions,
};
pub use watch::{WatchBroker, WatchConfig, WatchFilter, WatchStart, WatchStream};
