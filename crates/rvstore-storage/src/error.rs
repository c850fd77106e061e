use rvstore_types::{ObjectKey, ResourceVersion, TypeError};

/// Errors from storage contract operations.
///
/// `NotFound`, `AlreadyExists`, `Conflict` and `Expired` are expected,
/// caller-recoverable outcomes and are returned verbatim through every layer.
/// `Internal` and `Corrupt` indicate a broken backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// The requested object does not exist.
    #[error("{key} not found")]
    NotFound { key: String },

    /// An object with this key already exists.
    #[error("{key} already exists")]
    AlreadyExists { key: String },

    /// Optimistic-concurrency precondition failed or the retry budget ran out.
    #[error("conflict on {key}: {reason}")]
    Conflict { key: String, reason: String },

    /// The watch resume point is no longer retained; re-list and restart.
    #[error("resource version {requested} is too old (oldest resumable is {oldest})")]
    Expired {
        requested: ResourceVersion,
        oldest: ResourceVersion,
    },

    /// The request itself is invalid (names, selectors, immutable fields).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The caller-supplied update function rejected the object.
    #[error("update of {key} rejected: {reason}")]
    MutatorFailed { key: String, reason: String },

    /// Stored data failed to decode.
    #[error("corrupt object at {location}: {reason}")]
    Corrupt { location: String, reason: String },

    /// I/O failure, watermark failure, or any other backend fault.
    #[error("internal error: {0}")]
    Internal(String),
}

impl StorageError {
    pub fn not_found(key: &ObjectKey) -> Self {
        Self::NotFound {
            key: key.to_string(),
        }
    }

    pub fn already_exists(key: &ObjectKey) -> Self {
        Self::AlreadyExists {
            key: key.to_string(),
        }
    }

    pub fn conflict(key: &ObjectKey, reason: impl Into<String>) -> Self {
        Self::Conflict {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub fn mutator_failed(key: &ObjectKey, reason: impl Into<String>) -> Self {
        Self::MutatorFailed {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, Self::Expired { .. })
    }

    pub fn is_bad_request(&self) -> bool {
        matches!(self, Self::BadRequest(_))
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_) | Self::Corrupt { .. })
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Internal(format!("I/O error: {e}"))
    }
}

impl From<TypeError> for StorageError {
    fn from(e: TypeError) -> Self {
        Self::BadRequest(e.to_string())
    }
}

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
