use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::StorageError;
use crate::storage_traits::{
    expiry_from, validate_namespace, ContentDigest, KvStore, StorageResult,
};

/// On-disk wrapper around a stored value.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    key: String,
    expires_at: Option<DateTime<Utc>>,
    value_hex: String,
}

/// Filesystem-backed key-value store with git-style 2-char sharding.
///
/// Layout: `<root>/<namespace>/<first 2 hex chars>/<remaining hex chars>.json`
/// where the hex is the SHA-256 of the key, so arbitrary keys (slashes,
/// unicode) map to safe file names.
pub struct FsKvStore {
    root: PathBuf,
}

impl FsKvStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn entry_path(&self, namespace: &str, key: &str) -> PathBuf {
        let hex = ContentDigest::from_bytes(key.as_bytes()).to_string();
        self.root
            .join(namespace)
            .join(&hex[..2])
            .join(format!("{}.json", &hex[2..]))
    }
}

fn read_envelope(path: &Path, namespace: &str) -> StorageResult<Option<Envelope>> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StorageError::Io(e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| StorageError::Corrupt {
            namespace: namespace.to_string(),
            key: path.display().to_string(),
            detail: e.to_string(),
        })
}

fn decode_value(envelope: &Envelope, namespace: &str) -> StorageResult<Vec<u8>> {
    hex::decode(&envelope.value_hex).map_err(|e| StorageError::Corrupt {
        namespace: namespace.to_string(),
        key: envelope.key.clone(),
        detail: e.to_string(),
    })
}

fn is_live(envelope: &Envelope, now: DateTime<Utc>) -> bool {
    envelope.expires_at.map_or(true, |exp| now < exp)
}

async fn blocking<T, F>(f: F) -> StorageResult<T>
where
    F: FnOnce() -> StorageResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Backend(format!("blocking task failed: {e}")))?
}

#[async_trait]
impl KvStore for FsKvStore {
    async fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_namespace(namespace)?;
        let path = self.entry_path(namespace, key);
        let ns = namespace.to_string();
        blocking(move || {
            let Some(envelope) = read_envelope(&path, &ns)? else {
                return Ok(None);
            };
            if !is_live(&envelope, Utc::now()) {
                return Ok(None);
            }
            decode_value(&envelope, &ns).map(Some)
        })
        .await
    }

    async fn put(
        &self,
        namespace: &str,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> StorageResult<()> {
        validate_namespace(namespace)?;
        let path = self.entry_path(namespace, key);
        let envelope = Envelope {
            key: key.to_string(),
            expires_at: expiry_from(Utc::now(), ttl),
            value_hex: hex::encode(value),
        };
        let bytes = serde_json::to_vec(&envelope)?;
        blocking(move || {
            let shard_dir = path
                .parent()
                .ok_or_else(|| StorageError::Backend("entry path has no parent".to_string()))?;
            fs::create_dir_all(shard_dir)?;

            // Atomic write: write to temp file in the same directory, then rename.
            let mut tmp = NamedTempFile::new_in(shard_dir)?;
            tmp.write_all(&bytes)?;
            tmp.persist(&path).map_err(|e| StorageError::Io(e.error))?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, namespace: &str, key: &str) -> StorageResult<()> {
        validate_namespace(namespace)?;
        let path = self.entry_path(namespace, key);
        blocking(move || match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        })
        .await
    }

    async fn list_keys(&self, namespace: &str) -> StorageResult<Vec<String>> {
        validate_namespace(namespace)?;
        let ns_dir = self.root.join(namespace);
        let ns = namespace.to_string();
        blocking(move || {
            let mut keys = Vec::new();
            let shards = match fs::read_dir(&ns_dir) {
                Ok(s) => s,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
                Err(e) => return Err(StorageError::Io(e)),
            };
            let now = Utc::now();
            for shard in shards {
                let shard = shard?;
                if !shard.file_type()?.is_dir() {
                    continue;
                }
                for entry in fs::read_dir(shard.path())? {
                    let path = entry?.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("json") {
                        continue;
                    }
                    if let Some(envelope) = read_envelope(&path, &ns)? {
                        if is_live(&envelope, now) {
                            keys.push(envelope.key);
                        }
                    }
                }
            }
            keys.sort();
            Ok(keys)
        })
        .await
    }

    async fn clear(&self, namespace: &str) -> StorageResult<()> {
        validate_namespace(namespace)?;
        let ns_dir = self.root.join(namespace);
        blocking(move || match fs::remove_dir_all(&ns_dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        })
        .await
    }
}
