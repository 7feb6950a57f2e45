//! Structured observability hooks for forksync runs.
//!
//! This module provides:
//! - Run-scoped tracing spans via [`run_span`]
//! - Emission functions for sync, batch, provider and discovery events
//!
//! Events are emitted at `info!` (failures at `warn!`). Filtering follows
//! `RUST_LOG`; see [`crate::telemetry::init_tracing`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use forksync_state::{RepoId, SyncErrorKind, SyncOutcome};
use tracing::{info, warn};

use crate::provider::{CallError, Provider, ProviderError};

/// Span that tags every event of one batch or discovery run.
///
/// ```ignore
/// async { /* ... */ }.instrument(run_span("batch", &run_id)).await;
/// // every event inside carries run_kind=batch run_id=...
/// ```
pub fn run_span(run_kind: &str, run_id: &str) -> tracing::Span {
    tracing::info_span!("forksync.run", run_kind = %run_kind, run_id = %run_id)
}

pub fn emit_batch_started(run_id: &str, repos: usize, concurrency: usize) {
    info!(event = "batch.started", run_id = %run_id, repos, concurrency);
}

pub fn emit_batch_finished(
    run_id: &str,
    up_to_date: usize,
    merged: usize,
    conflicted: usize,
    errored: usize,
    duration_ms: u64,
) {
    info!(
        event = "batch.finished",
        run_id = %run_id,
        up_to_date,
        merged,
        conflicted,
        errored,
        duration_ms,
    );
}

/// Emit event: one repository reached a terminal sync state.
pub fn emit_sync_finished(repo: &RepoId, status: SyncOutcome, behind: u32, ahead: u32) {
    info!(
        event = "sync.finished",
        repo = %repo,
        status = %status,
        commits_behind = behind,
        commits_ahead = ahead,
    );
}

pub fn emit_sync_conflicted(repo: &RepoId, paths: &[String]) {
    warn!(event = "sync.conflicted", repo = %repo, paths = ?paths);
}

pub fn emit_sync_failed(repo: &RepoId, kind: SyncErrorKind, error: &dyn std::fmt::Display) {
    warn!(event = "sync.failed", repo = %repo, kind = %kind, error = %error);
}

pub fn emit_provider_retry(
    provider: Provider,
    operation: &str,
    attempt: u32,
    delay: Duration,
    error: &ProviderError,
) {
    warn!(
        event = "provider.retry",
        provider = %provider,
        operation = %operation,
        attempt,
        delay_ms = delay.as_millis() as u64,
        error = %error,
    );
}

pub fn emit_provider_deferred(provider: Provider, operation: &str, reset_at: DateTime<Utc>) {
    warn!(
        event = "provider.rate_limited",
        provider = %provider,
        operation = %operation,
        reset_at = %reset_at,
    );
}

pub fn emit_provider_failed(provider: Provider, operation: &str, attempts: u32, error: &CallError) {
    warn!(
        event = "provider.failed",
        provider = %provider,
        operation = %operation,
        attempts,
        error = %error,
    );
}

pub fn emit_state_reinitialized(detail: &str) {
    warn!(event = "state.reinitialized", detail = %detail);
}

pub fn emit_health_computed(repo: &RepoId, score: f64) {
    info!(event = "health.computed", repo = %repo, score);
}

pub fn emit_discovery_started(run_id: &str, repos: usize, limit: usize) {
    info!(event = "discovery.started", run_id = %run_id, repos, limit);
}

pub fn emit_discovery_finished(
    run_id: &str,
    opportunities: usize,
    skipped: usize,
    failed_repos: usize,
    cache_hits: u64,
    cache_misses: u64,
) {
    info!(
        event = "discovery.finished",
        run_id = %run_id,
        opportunities,
        skipped,
        failed_repos,
        cache_hits,
        cache_misses,
    );
}

pub fn emit_repo_fetch_failed(repo: &RepoId, error: &dyn std::fmt::Display) {
    warn!(event = "discovery.repo_failed", repo = %repo, error = %error);
}

/// Emit event: a candidate was excluded from ranking.
pub fn emit_candidate_skipped(repo: &RepoId, issue: &str, reason: &dyn std::fmt::Display) {
    warn!(event = "discovery.candidate_skipped", repo = %repo, issue = %issue, reason = %reason);
}

pub fn emit_contributions_synced(author: &str, fetched: usize, added: usize, updated: usize) {
    info!(event = "contributions.synced", author = %author, fetched, added, updated);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_span_enter_does_not_panic() {
        let _entered = run_span("batch", "test-run-id").entered();
        emit_sync_finished(&RepoId::new("octo/widgets"), SyncOutcome::UpToDate, 0, 0);
    }
}
