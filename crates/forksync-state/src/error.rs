//! Error types for forksync-state

use thiserror::Error;

/// Errors that can occur in the persistence layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// Namespace contains characters outside `[a-z0-9_-]`
    #[error("invalid namespace: {namespace}")]
    InvalidNamespace { namespace: String },

    /// Digest string is not 64 lowercase hex chars
    #[error("invalid digest: {digest}")]
    InvalidDigest { digest: String },

    /// Persisted bytes could not be decoded
    #[error("corrupt entry {namespace}/{key}: {detail}")]
    Corrupt {
        namespace: String,
        key: String,
        detail: String,
    },

    /// Serialization error
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend-specific failure
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
