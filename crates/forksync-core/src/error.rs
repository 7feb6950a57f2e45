//! Run-level error taxonomy for forksync.
//!
//! Per-repository and per-candidate failures never surface here; they are
//! folded into `SyncResult`s and `DiscoveryReport`s. What remains is what a
//! caller must act on: bad configuration, rejected credentials, unreadable
//! state, and store I/O.

use forksync_state::{RepoId, StorageError};

use crate::provider::{CallError, Provider};

#[derive(Debug, thiserror::Error)]
pub enum ForkSyncError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Credentials rejected; the run stops.
    #[error("{provider} authentication failed: {detail}")]
    Authentication { provider: Provider, detail: String },

    /// Persisted state could not be decoded and was reinitialized.
    #[error("corrupt state reinitialized: {detail}")]
    CorruptState { detail: String },

    #[error("repository not registered: {0}")]
    NotRegistered(RepoId),

    #[error("repository already registered: {0}")]
    AlreadyRegistered(RepoId),

    #[error("provider call failed: {0}")]
    Provider(CallError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<CallError> for ForkSyncError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::AuthenticationError { provider, detail } => {
                ForkSyncError::Authentication { provider, detail }
            }
            other => ForkSyncError::Provider(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ForkSyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_call_error_becomes_fatal_variant() {
        let err: ForkSyncError = CallError::AuthenticationError {
            provider: Provider::Llm,
            detail: "invalid x-api-key".into(),
        }
        .into();
        assert!(matches!(err, ForkSyncError::Authentication { .. }));
        assert!(err.to_string().contains("llm authentication failed"));
    }

    #[test]
    fn not_registered_display() {
        let err = ForkSyncError::NotRegistered(RepoId::new("octo/widgets"));
        assert!(err.to_string().contains("octo/widgets"));
    }
}
