//! Batch Coordinator: bounded-parallel sync of many repositories.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use forksync_state::{RepoId, SyncErrorKind, SyncOutcome, SyncResult};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{instrument, Instrument};

use super::cancel::CancelSignal;
use super::engine::SyncEngine;
use crate::metrics::METRICS;
use crate::obs;
use crate::provider::Provider;

/// Outcome of one `sync_all` run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub up_to_date: usize,
    pub merged: usize,
    pub conflicted: usize,
    pub errored: usize,
    /// Set when an authentication failure stopped further dispatch.
    pub fatal: Option<String>,
    /// One result per requested id, in request order.
    pub results: Vec<SyncResult>,
}

impl BatchSummary {
    fn new(run_id: String, started_at: DateTime<Utc>, results: Vec<SyncResult>) -> Self {
        let count = |s: SyncOutcome| results.iter().filter(|r| r.status == s).count();
        let fatal = results
            .iter()
            .find(|r| r.error_kind() == Some(SyncErrorKind::Authentication))
            .and_then(|r| r.error.as_ref())
            .map(|e| e.message.clone());
        Self {
            up_to_date: count(SyncOutcome::UpToDate),
            merged: count(SyncOutcome::Merged),
            conflicted: count(SyncOutcome::Conflicted),
            errored: count(SyncOutcome::Error),
            run_id,
            started_at,
            finished_at: started_at,
            fatal,
            results,
        }
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn is_success(&self) -> bool {
        self.errored == 0 && self.fatal.is_none()
    }
}

pub struct BatchCoordinator {
    engine: Arc<SyncEngine>,
}

impl BatchCoordinator {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self { engine }
    }

    /// Sync every id with at most `concurrency_limit` in flight.
    ///
    /// Always returns exactly one result per id, in input order. A repeated
    /// id is synced once and its result repeated. Cancellation (by the
    /// caller, or by an authentication failure inside the run) stops new
    /// dispatches; the undispatched ids get `Cancelled` error results.
    #[instrument(skip(self, ids, cancel), fields(repos = ids.len()))]
    pub async fn sync_all(
        &self,
        ids: &[RepoId],
        concurrency_limit: usize,
        cancel: &CancelSignal,
    ) -> BatchSummary {
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = obs::run_span("batch", &run_id);
        self.run_batch(run_id, ids, concurrency_limit, cancel)
            .instrument(span)
            .await
    }

    async fn run_batch(
        &self,
        run_id: String,
        ids: &[RepoId],
        concurrency_limit: usize,
        cancel: &CancelSignal,
    ) -> BatchSummary {
        let clock = self.engine.facade().clock().clone();
        let started_at = clock.now();
        let timer = Instant::now();

        let limit = self
            .engine
            .facade()
            .suggested_parallelism(Provider::GitRemote, concurrency_limit.max(1));
        obs::emit_batch_started(&run_id, ids.len(), limit);

        let semaphore = Arc::new(Semaphore::new(limit));
        let fatal = CancelSignal::new();
        let mut first_index: HashMap<&RepoId, usize> = HashMap::new();
        let mut slots: Vec<Option<SyncResult>> = vec![None; ids.len()];
        let mut join_set = JoinSet::new();

        for (idx, id) in ids.iter().enumerate() {
            if first_index.contains_key(id) {
                continue;
            }
            first_index.insert(id, idx);

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                _ = fatal.cancelled() => None,
                permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit.filter(|_| !cancel.is_cancelled() && !fatal.is_cancelled())
            else {
                slots[idx] = Some(cancelled_result(id, clock.now(), fatal.is_cancelled()));
                continue;
            };

            let engine = Arc::clone(&self.engine);
            let fatal = fatal.clone();
            let id = id.clone();
            join_set.spawn(async move {
                let result = engine.sync(&id).await;
                if result.error_kind() == Some(SyncErrorKind::Authentication) {
                    fatal.cancel();
                }
                drop(permit);
                (idx, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, result)) => slots[idx] = Some(result),
                Err(e) => tracing::error!(error = %e, "sync worker failed"),
            }
        }

        let now = clock.now();
        let results: Vec<SyncResult> = ids
            .iter()
            .enumerate()
            .map(|(idx, id)| {
                let source = first_index.get(id).copied().unwrap_or(idx);
                slots[source].clone().unwrap_or_else(|| {
                    METRICS.inc_sync_errors();
                    SyncResult::failed(
                        id.clone(),
                        SyncErrorKind::Internal,
                        "sync worker terminated without a result",
                        now,
                    )
                })
            })
            .collect();

        let mut summary = BatchSummary::new(run_id, started_at, results);
        summary.finished_at = clock.now();
        obs::emit_batch_finished(
            &summary.run_id,
            summary.up_to_date,
            summary.merged,
            summary.conflicted,
            summary.errored,
            timer.elapsed().as_millis() as u64,
        );
        METRICS.flush();
        summary
    }
}

fn cancelled_result(id: &RepoId, at: DateTime<Utc>, after_auth_failure: bool) -> SyncResult {
    let message = if after_auth_failure {
        "not started: run aborted after an authentication failure"
    } else {
        "not started: run cancelled"
    };
    SyncResult::failed(id.clone(), SyncErrorKind::Cancelled, message, at)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(status: SyncOutcome, kind: Option<SyncErrorKind>) -> SyncResult {
        let now = Utc::now();
        let mut r = SyncResult::failed(RepoId::new("r"), SyncErrorKind::Internal, "x", now);
        r.status = status;
        r.error = kind.map(|kind| forksync_state::SyncErrorDetail {
            kind,
            message: "auth rejected".into(),
        });
        r
    }

    #[test]
    fn summary_counts_and_fatal() {
        let summary = BatchSummary::new(
            "run".into(),
            Utc::now(),
            vec![
                result(SyncOutcome::UpToDate, None),
                result(SyncOutcome::Merged, None),
                result(SyncOutcome::Merged, None),
                result(SyncOutcome::Error, Some(SyncErrorKind::Authentication)),
            ],
        );
        assert_eq!(summary.total(), 4);
        assert_eq!(summary.merged, 2);
        assert_eq!(summary.errored, 1);
        assert_eq!(summary.fatal.as_deref(), Some("auth rejected"));
        assert!(!summary.is_success());
    }
}
