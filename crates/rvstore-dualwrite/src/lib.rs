//! # rvstore-dualwrite
//!
//! A [`DualWriter`] sits in front of a legacy and a new storage backend and
//! implements the same [`Storage`](rvstore_storage::Storage) contract, so a
//! resource kind can be migrated between backends in four steps without
//! callers noticing:
//!
//! 1. legacy only
//! 2. legacy authoritative, new store written best-effort
//! 3. new store authoritative for reads, legacy still written first
//! 4. new store only
//!
//! Failures on the non-authoritative side are logged, counted and recorded
//! in a [`ReconcileLog`]; they never change what the caller sees.

pub mod config;
pub mod error;
pub mod mode;
pub mod mode1;
pub mod mode2;
pub mod mode3;
pub mod mode4;
pub mod reconcile;
pub mod shadow;
pub mod writer;

#[cfg(test)]
mod testing;

pub use config::DualWriterConfig;
pub use error::{DualWriteError, Result};
pub use mode::Mode;
pub use reconcile::{DualWriteStats, Operation, ReconcileEntry, ReconcileLog};
pub use shadow::Drift;
pub use writer::DualWriter;
