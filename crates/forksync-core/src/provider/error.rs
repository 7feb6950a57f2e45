//! Failure types at the provider boundary.

use std::time::Duration;

use chrono::{DateTime, Utc};
use forksync_state::SyncErrorKind;

use super::Provider;

/// What a collaborator reports for a single failed attempt.
///
/// Adapters map their transport's errors into these; the retry classifier
/// decides what happens next.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    #[error("rate limited until {reset_at}")]
    RateLimited { reset_at: DateTime<Utc> },

    #[error("authentication rejected: {0}")]
    Authentication(String),

    #[error("request rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The operation itself was refused (e.g. git on a dirty tree).
    #[error("{0}")]
    Operation(String),
}

impl ProviderError {
    /// Network faults, timeouts, 5xx and outages are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Network(_)
                | ProviderError::Timeout(_)
                | ProviderError::Server { .. }
                | ProviderError::Unavailable(_)
        )
    }
}

/// Terminal outcome of a facade call after classification and retries.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CallError {
    #[error("{provider} {operation}: gave up after {attempts} attempts: {last}")]
    TransientProviderError {
        provider: Provider,
        operation: String,
        attempts: u32,
        last: ProviderError,
    },

    #[error("{provider} rate limit exceeded until {reset_at}")]
    RateLimitExceeded {
        provider: Provider,
        reset_at: DateTime<Utc>,
    },

    #[error("{provider} authentication failed: {detail}")]
    AuthenticationError { provider: Provider, detail: String },

    #[error("{provider} unavailable: {detail}")]
    ProviderUnavailable { provider: Provider, detail: String },

    /// Non-transient failure, surfaced without retry.
    #[error("{provider} {operation} failed: {source}")]
    Failed {
        provider: Provider,
        operation: String,
        source: ProviderError,
    },
}

impl CallError {
    pub fn provider(&self) -> Provider {
        match self {
            CallError::TransientProviderError { provider, .. }
            | CallError::RateLimitExceeded { provider, .. }
            | CallError::AuthenticationError { provider, .. }
            | CallError::ProviderUnavailable { provider, .. }
            | CallError::Failed { provider, .. } => *provider,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, CallError::AuthenticationError { .. })
    }

    /// Coarse class recorded on an `Error` sync result.
    pub fn sync_kind(&self) -> SyncErrorKind {
        match self {
            CallError::TransientProviderError { .. } => SyncErrorKind::Transient,
            CallError::RateLimitExceeded { .. } => SyncErrorKind::RateLimited,
            CallError::AuthenticationError { .. } => SyncErrorKind::Authentication,
            CallError::ProviderUnavailable { .. } => SyncErrorKind::Unavailable,
            CallError::Failed { provider, .. } => match provider {
                Provider::GitRemote => SyncErrorKind::Git,
                _ => SyncErrorKind::Internal,
            },
        }
    }
}
