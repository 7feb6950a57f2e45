//! Repository State Store: the durable registry of tracked forks.
//!
//! Records live in memory behind one `RwLock` and are written through to the
//! [`KvStore`] one key per repository. Writers to the same repository queue
//! on a per-key async mutex; the in-memory swap happens only after the
//! durable write succeeds, so readers never observe a half-applied update.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use forksync_state::{KvStore, RepoId, SyncResult, TrackedRepository};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ForkSyncError, Result};
use crate::obs;

pub const REPOS_NAMESPACE: &str = "repos";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RepoRecord {
    repository: TrackedRepository,
    #[serde(default)]
    history: VecDeque<SyncResult>,
}

/// Result of [`RepositoryStateStore::load`].
pub struct LoadedStore {
    pub store: RepositoryStateStore,
    /// `Some(CorruptState)` when persisted state was unreadable and the
    /// store started empty.
    pub warning: Option<ForkSyncError>,
}

pub struct RepositoryStateStore {
    kv: Arc<dyn KvStore>,
    records: RwLock<BTreeMap<RepoId, RepoRecord>>,
    writers: Mutex<HashMap<RepoId, Arc<tokio::sync::Mutex<()>>>>,
    history_limit: usize,
}

impl RepositoryStateStore {
    /// Start an empty store without reading anything.
    pub fn empty(kv: Arc<dyn KvStore>, history_limit: usize) -> Self {
        Self {
            kv,
            records: RwLock::new(BTreeMap::new()),
            writers: Mutex::new(HashMap::new()),
            history_limit: history_limit.max(1),
        }
    }

    /// Read every persisted record.
    ///
    /// Malformed state does not fail the load: the namespace is cleared, the
    /// store starts empty and the corruption is returned as a warning. Only a
    /// failure to clear the namespace is an error.
    pub async fn load(kv: Arc<dyn KvStore>, history_limit: usize) -> Result<LoadedStore> {
        let store = Self::empty(kv, history_limit);
        match store.read_all().await {
            Ok(records) => {
                debug!(count = records.len(), "loaded repository state");
                *store.records.write().unwrap_or_else(|e| e.into_inner()) = records;
                Ok(LoadedStore {
                    store,
                    warning: None,
                })
            }
            Err(detail) => {
                obs::emit_state_reinitialized(&detail);
                store.kv.clear(REPOS_NAMESPACE).await?;
                Ok(LoadedStore {
                    store,
                    warning: Some(ForkSyncError::CorruptState { detail }),
                })
            }
        }
    }

    async fn read_all(&self) -> std::result::Result<BTreeMap<RepoId, RepoRecord>, String> {
        let keys = self
            .kv
            .list_keys(REPOS_NAMESPACE)
            .await
            .map_err(|e| e.to_string())?;
        let mut records = BTreeMap::new();
        for key in keys {
            let bytes = match self.kv.get(REPOS_NAMESPACE, &key).await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => continue,
                Err(e) => return Err(e.to_string()),
            };
            let mut record: RepoRecord = serde_json::from_slice(&bytes)
                .map_err(|e| format!("record {key}: {e}"))?;
            if record.repository.id.as_str() != key {
                return Err(format!(
                    "record {key} claims id {}",
                    record.repository.id
                ));
            }
            while record.history.len() > self.history_limit {
                record.history.pop_front();
            }
            records.insert(record.repository.id.clone(), record);
        }
        Ok(records)
    }

    fn writer(&self, id: &RepoId) -> Arc<tokio::sync::Mutex<()>> {
        let mut writers = self.writers.lock().unwrap_or_else(|e| e.into_inner());
        writers.entry(id.clone()).or_default().clone()
    }

    /// Drop the writer lock for `id` when nobody else holds or awaits it.
    /// Clones are only handed out under the map lock, so the count is exact.
    fn prune_writer(&self, id: &RepoId, writer: Arc<tokio::sync::Mutex<()>>) {
        let mut writers = self.writers.lock().unwrap_or_else(|e| e.into_inner());
        if writers
            .get(id)
            .is_some_and(|w| Arc::ptr_eq(w, &writer) && Arc::strong_count(&writer) == 2)
        {
            writers.remove(id);
        }
    }

    #[cfg(test)]
    fn writer_count(&self) -> usize {
        self.writers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn snapshot(&self, id: &RepoId) -> Option<RepoRecord> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.get(id).cloned()
    }

    /// Persist, then publish. Caller holds the key's writer lock.
    async fn commit(&self, record: RepoRecord) -> Result<()> {
        let bytes = serde_json::to_vec(&record)?;
        let id = record.repository.id.clone();
        self.kv
            .put(REPOS_NAMESPACE, id.as_str(), &bytes, None)
            .await?;
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.insert(id, record);
        Ok(())
    }

    pub fn get(&self, id: &RepoId) -> Option<TrackedRepository> {
        self.snapshot(id).map(|r| r.repository)
    }

    pub fn contains(&self, id: &RepoId) -> bool {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.contains_key(id)
    }

    /// All tracked repositories, ordered by id.
    pub fn list(&self) -> Vec<TrackedRepository> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.values().map(|r| r.repository.clone()).collect()
    }

    /// Insert or replace a repository, keeping its sync history.
    pub async fn upsert(&self, repository: TrackedRepository) -> Result<()> {
        let writer = self.writer(&repository.id);
        let _guard = writer.lock().await;
        let history = self
            .snapshot(&repository.id)
            .map(|r| r.history)
            .unwrap_or_default();
        self.commit(RepoRecord {
            repository,
            history,
        })
        .await
    }

    /// Insert a repository that must not already be tracked.
    pub async fn register(&self, repository: TrackedRepository) -> Result<()> {
        let writer = self.writer(&repository.id);
        let _guard = writer.lock().await;
        if self.contains(&repository.id) {
            return Err(ForkSyncError::AlreadyRegistered(repository.id));
        }
        self.commit(RepoRecord {
            repository,
            history: VecDeque::new(),
        })
        .await
    }

    /// Stop tracking a repository. History goes with it.
    pub async fn remove(&self, id: &RepoId) -> Result<TrackedRepository> {
        let writer = self.writer(id);
        let removed = {
            let _guard = writer.lock().await;
            self.remove_locked(id).await
        };
        self.prune_writer(id, writer);
        removed
    }

    async fn remove_locked(&self, id: &RepoId) -> Result<TrackedRepository> {
        let record = self
            .snapshot(id)
            .ok_or_else(|| ForkSyncError::NotRegistered(id.clone()))?;
        self.kv.delete(REPOS_NAMESPACE, id.as_str()).await?;
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        Ok(record.repository)
    }

    /// Apply a sync outcome to the repository's sync fields and append it to
    /// the bounded history, as one atomic update.
    pub async fn record_sync_result(
        &self,
        id: &RepoId,
        result: SyncResult,
    ) -> Result<TrackedRepository> {
        let writer = self.writer(id);
        let _guard = writer.lock().await;
        let mut record = self
            .snapshot(id)
            .ok_or_else(|| ForkSyncError::NotRegistered(id.clone()))?;
        record.repository.apply_sync_result(&result);
        record.history.push_back(result);
        while record.history.len() > self.history_limit {
            record.history.pop_front();
        }
        let repository = record.repository.clone();
        self.commit(record).await?;
        Ok(repository)
    }

    pub async fn record_health(&self, id: &RepoId, score: f64) -> Result<()> {
        let writer = self.writer(id);
        let _guard = writer.lock().await;
        let mut record = self
            .snapshot(id)
            .ok_or_else(|| ForkSyncError::NotRegistered(id.clone()))?;
        record.repository.health_score = Some(score.clamp(0.0, 100.0));
        self.commit(record).await
    }

    /// Past results, oldest first.
    pub fn history(&self, id: &RepoId) -> Result<Vec<SyncResult>> {
        self.snapshot(id)
            .map(|r| r.history.into_iter().collect())
            .ok_or_else(|| ForkSyncError::NotRegistered(id.clone()))
    }

    /// The most recent result, if any.
    pub fn last_result(&self, id: &RepoId) -> Option<SyncResult> {
        self.snapshot(id).and_then(|r| r.history.back().cloned())
    }
}
