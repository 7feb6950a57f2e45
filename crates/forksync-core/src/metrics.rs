//! Global atomic counters for forksync observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a batch or discovery run).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters, no allocations, no locking.
pub struct Metrics {
    provider_calls: AtomicU64,
    provider_retries: AtomicU64,
    rate_limit_waits: AtomicU64,
    repos_synced: AtomicU64,
    sync_conflicts: AtomicU64,
    sync_errors: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    llm_calls: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn bump(counter: &AtomicU64, name: &'static str) {
    counter.fetch_add(1, Ordering::Relaxed);
    tracing::trace!(metric = name, "counter incremented");
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            provider_calls: AtomicU64::new(0),
            provider_retries: AtomicU64::new(0),
            rate_limit_waits: AtomicU64::new(0),
            repos_synced: AtomicU64::new(0),
            sync_conflicts: AtomicU64::new(0),
            sync_errors: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            llm_calls: AtomicU64::new(0),
        }
    }

    /// One attempt issued through the facade.
    pub fn inc_provider_calls(&self) {
        bump(&self.provider_calls, "provider_calls");
    }

    pub fn inc_provider_retries(&self) {
        bump(&self.provider_retries, "provider_retries");
    }

    /// A caller was queued behind a rate-limit block.
    pub fn inc_rate_limit_waits(&self) {
        bump(&self.rate_limit_waits, "rate_limit_waits");
    }

    pub fn inc_repos_synced(&self) {
        bump(&self.repos_synced, "repos_synced");
    }

    pub fn inc_sync_conflicts(&self) {
        bump(&self.sync_conflicts, "sync_conflicts");
    }

    pub fn inc_sync_errors(&self) {
        bump(&self.sync_errors, "sync_errors");
    }

    pub fn inc_cache_hits(&self) {
        bump(&self.cache_hits, "cache_hits");
    }

    pub fn inc_cache_misses(&self) {
        bump(&self.cache_misses, "cache_misses");
    }

    pub fn inc_llm_calls(&self) {
        bump(&self.llm_calls, "llm_calls");
    }

    /// Emit all current counter values as a single `info!` event.
    ///
    /// Call this at natural boundaries (end of a batch, end of discovery)
    /// rather than on every increment.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            provider_calls = self.provider_calls(),
            provider_retries = self.provider_retries(),
            rate_limit_waits = self.rate_limit_waits(),
            repos_synced = self.repos_synced(),
            sync_conflicts = self.sync_conflicts(),
            sync_errors = self.sync_errors(),
            cache_hits = self.cache_hits(),
            cache_misses = self.cache_misses(),
            llm_calls = self.llm_calls(),
        );
    }

    pub fn provider_calls(&self) -> u64 {
        self.provider_calls.load(Ordering::Relaxed)
    }

    pub fn provider_retries(&self) -> u64 {
        self.provider_retries.load(Ordering::Relaxed)
    }

    pub fn rate_limit_waits(&self) -> u64 {
        self.rate_limit_waits.load(Ordering::Relaxed)
    }

    pub fn repos_synced(&self) -> u64 {
        self.repos_synced.load(Ordering::Relaxed)
    }

    pub fn sync_conflicts(&self) -> u64 {
        self.sync_conflicts.load(Ordering::Relaxed)
    }

    pub fn sync_errors(&self) -> u64 {
        self.sync_errors.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    pub fn llm_calls(&self) -> u64 {
        self.llm_calls.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        for counter in [
            &self.provider_calls,
            &self.provider_retries,
            &self.rate_limit_waits,
            &self.repos_synced,
            &self.sync_conflicts,
            &self.sync_errors,
            &self.cache_hits,
            &self.cache_misses,
            &self.llm_calls,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
