//! Analysis cache with at-most-one-in-flight-per-key.
//!
//! Entries are stored in the [`KvStore`] under `analysis_cache`, written with
//! the configured TTL. Freshness is decided against the injected clock from
//! the entry's own `computed_at`, so the physical TTL is only a cleanup
//! hint. Concurrent misses on one key share a single computation.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use forksync_state::{ContentDigest, KvStore};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::profile::SkillProfile;
use super::AnalysisFailure;
use crate::clock::Clock;
use crate::ports::{IssueAnalysis, IssueCandidate, IssueIdentity, TokenUsage};

pub const CACHE_NAMESPACE: &str = "analysis_cache";

/// Stable key over issue identity, issue content and skill profile.
pub fn cache_key(issue: &IssueCandidate, profile: &SkillProfile) -> ContentDigest {
    let number = issue.identity.number.to_string();
    let content = issue.content_fingerprint();
    let profile = profile.fingerprint();
    ContentDigest::from_parts([
        issue.identity.repo.as_str(),
        number.as_str(),
        content.as_str(),
        profile.as_str(),
    ])
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisCacheEntry {
    pub key: String,
    pub issue: IssueIdentity,
    pub profile_fingerprint: String,
    pub analysis: IssueAnalysis,
    pub usage: TokenUsage,
    pub computed_at: DateTime<Utc>,
}

/// How a lookup was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Served from storage; no provider call.
    Hit,
    /// This caller's request triggered the provider call.
    Computed,
    /// Joined a computation another caller started.
    Coalesced,
}

type Pending = Shared<BoxFuture<'static, Result<(AnalysisCacheEntry, bool), AnalysisFailure>>>;

pub struct AnalysisCache {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    in_flight: Mutex<HashMap<String, Pending>>,
}

impl AnalysisCache {
    pub fn new(kv: Arc<dyn KvStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            kv,
            clock,
            ttl,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Fresh entry for `key` computed for `profile_fingerprint`, if stored.
    pub async fn lookup(
        &self,
        key: &ContentDigest,
        profile_fingerprint: &ContentDigest,
    ) -> Option<AnalysisCacheEntry> {
        read_fresh(
            self.kv.as_ref(),
            self.clock.as_ref(),
            self.ttl,
            key.as_str(),
            profile_fingerprint.as_str(),
        )
        .await
    }

    /// Return the cached analysis for `key`, or run `compute` exactly once
    /// across all concurrent callers and store its result.
    ///
    /// A failed computation is not cached; every caller waiting on it gets
    /// the same failure.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &ContentDigest,
        profile_fingerprint: &ContentDigest,
        compute: F,
    ) -> Result<(AnalysisCacheEntry, CacheOutcome), AnalysisFailure>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AnalysisCacheEntry, AnalysisFailure>> + Send + 'static,
    {
        if let Some(entry) = self.lookup(key, profile_fingerprint).await {
            return Ok((entry, CacheOutcome::Hit));
        }

        let (pending, leader) = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            match in_flight.get(key.as_str()) {
                Some(pending) => (pending.clone(), false),
                None => {
                    let pending = self.spawn_pending(key, profile_fingerprint, compute());
                    in_flight.insert(key.as_str().to_string(), pending.clone());
                    (pending, true)
                }
            }
        };

        let outcome = pending.clone().await;

        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            if in_flight
                .get(key.as_str())
                .is_some_and(|p| p.ptr_eq(&pending))
            {
                in_flight.remove(key.as_str());
            }
        }

        let (entry, from_storage) = outcome?;
        let how = match (from_storage, leader) {
            (true, _) => CacheOutcome::Hit,
            (false, true) => CacheOutcome::Computed,
            (false, false) => CacheOutcome::Coalesced,
        };
        Ok((entry, how))
    }

    /// The shared work: re-check storage (a previous leader may have
    /// finished since our lookup), otherwise compute and persist.
    fn spawn_pending<Fut>(
        &self,
        key: &ContentDigest,
        profile_fingerprint: &ContentDigest,
        compute: Fut,
    ) -> Pending
    where
        Fut: Future<Output = Result<AnalysisCacheEntry, AnalysisFailure>> + Send + 'static,
    {
        let kv = Arc::clone(&self.kv);
        let clock = Arc::clone(&self.clock);
        let ttl = self.ttl;
        let key = key.as_str().to_string();
        let profile = profile_fingerprint.as_str().to_string();
        async move {
            if let Some(entry) =
                read_fresh(kv.as_ref(), clock.as_ref(), ttl, &key, &profile).await
            {
                return Ok((entry, true));
            }
            let entry = compute.await?;
            match serde_json::to_vec(&entry) {
                Ok(bytes) => {
                    if let Err(e) = kv.put(CACHE_NAMESPACE, &key, &bytes, Some(ttl)).await {
                        warn!(key = %key, error = %e, "failed to persist analysis");
                    }
                }
                Err(e) => warn!(key = %key, error = %e, "failed to encode analysis"),
            }
            Ok((entry, false))
        }
        .boxed()
        .shared()
    }
}

async fn read_fresh(
    kv: &dyn KvStore,
    clock: &dyn Clock,
    ttl: Duration,
    key: &str,
    profile_fingerprint: &str,
) -> Option<AnalysisCacheEntry> {
    let bytes = match kv.get(CACHE_NAMESPACE, key).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return None,
        Err(e) => {
            warn!(key = %key, error = %e, "unreadable analysis cache entry");
            return None;
        }
    };
    let entry: AnalysisCacheEntry = match serde_json::from_slice(&bytes) {
        Ok(entry) => entry,
        Err(e) => {
            warn!(key = %key, error = %e, "malformed analysis cache entry");
            return None;
        }
    };
    if entry.profile_fingerprint != profile_fingerprint || entry.key != key {
        debug!(key = %key, "cache entry belongs to another profile");
        return None;
    }
    let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
    let fresh = entry
        .computed_at
        .checked_add_signed(ttl)
        .map_or(true, |expires| clock.now() < expires);
    fresh.then_some(entry)
}
