//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryKvStore`, which satisfies the `KvStore` contract without
//! touching disk.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::storage_traits::*;

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |exp| now < exp)
    }
}

/// In-memory key-value store backed by a `BTreeMap<(namespace, key), entry>`.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: Mutex<BTreeMap<(String, String), Entry>>,
    writes: AtomicU64,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `put` calls, for asserting write traffic.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// The TTL-bearing expiry recorded for a key, if any.
    pub fn expiry_of(&self, namespace: &str, key: &str) -> Option<DateTime<Utc>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(&(namespace.to_string(), key.to_string()))
            .and_then(|e| e.expires_at)
    }

    /// Plant raw bytes without validation, e.g. to simulate corrupt state.
    pub fn insert_raw(&self, namespace: &str, key: &str, value: &[u8]) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            (namespace.to_string(), key.to_string()),
            Entry {
                value: value.to_vec(),
                expires_at: None,
            },
        );
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_namespace(namespace)?;
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        Ok(entries
            .get(&(namespace.to_string(), key.to_string()))
            .filter(|e| e.live(now))
            .map(|e| e.value.clone()))
    }

    async fn put(
        &self,
        namespace: &str,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> StorageResult<()> {
        validate_namespace(namespace)?;
        let entry = Entry {
            value: value.to_vec(),
            expires_at: expiry_from(Utc::now(), ttl),
        };
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert((namespace.to_string(), key.to_string()), entry);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> StorageResult<()> {
        validate_namespace(namespace)?;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(&(namespace.to_string(), key.to_string()));
        Ok(())
    }

    async fn list_keys(&self, namespace: &str) -> StorageResult<Vec<String>> {
        validate_namespace(namespace)?;
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        Ok(entries
            .iter()
            .filter(|((ns, _), e)| ns == namespace && e.live(now))
            .map(|((_, key), _)| key.clone())
            .collect())
    }

    async fn clear(&self, namespace: &str) -> StorageResult<()> {
        validate_namespace(namespace)?;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|(ns, _), _| ns != namespace);
        Ok(())
    }
}
