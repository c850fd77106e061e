use thiserror::Error;

/// Errors produced by type parsing and validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid resource version {0:?}: expected a decimal unsigned integer")]
    InvalidResourceVersion(String),

    #[error("invalid selector {selector:?}: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}
