//! Storage trait definitions for forksync
//!
//! - `ContentDigest`: SHA-256 content address used for fingerprints and cache keys
//! - `KvStore`: durable, namespaced key-value storage with per-write TTL
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Digest of several fields, each length-prefixed so that
    /// `["ab", "c"]` and `["a", "bc"]` never collide.
    pub fn from_parts<I, P>(parts: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[u8]>,
    {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        for part in parts {
            let part = part.as_ref();
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part);
        }
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// KvStore
// ---------------------------------------------------------------------------

/// Durable key-value storage, partitioned into namespaces.
///
/// Guarantees:
/// - `put` replaces the whole value atomically; readers see the old or the
///   new bytes, never a mix.
/// - A value written with `ttl = Some(d)` is not returned by `get` or
///   `list_keys` once `d` has elapsed since the write.
/// - `delete` of an absent key is a no-op.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value. `Ok(None)` when absent or expired.
    async fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Write a value, optionally expiring after `ttl`.
    async fn put(
        &self,
        namespace: &str,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> StorageResult<()>;

    /// Remove a value.
    async fn delete(&self, namespace: &str, key: &str) -> StorageResult<()>;

    /// All live keys in a namespace, sorted ascending.
    async fn list_keys(&self, namespace: &str) -> StorageResult<Vec<String>>;

    /// Drop every entry in a namespace, readable or not.
    async fn clear(&self, namespace: &str) -> StorageResult<()>;
}

/// Reject namespaces that could escape a directory or collide after folding.
pub(crate) fn validate_namespace(namespace: &str) -> StorageResult<()> {
    let valid = !namespace.is_empty()
        && namespace
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidNamespace {
            namespace: namespace.to_string(),
        })
    }
}

/// Absolute expiry for a write made at `now`.
pub(crate) fn expiry_from(now: DateTime<Utc>, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
    ttl.map(|ttl| {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
    })
}
