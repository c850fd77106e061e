/// Errors raised while configuring a dual writer.
///
/// Storage operations themselves return
/// [`StorageError`](rvstore_storage::StorageError) unchanged from the
/// primary backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DualWriteError {
    #[error("invalid migration mode {0:?}: expected 1-4 or legacy, dual-legacy, dual-unified, unified")]
    InvalidMode(String),
}

pub type Result<T> = std::result::Result<T, DualWriteError>;
