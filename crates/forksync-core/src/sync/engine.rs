//! Per-repository sync state machine.
//!
//! ```text
//! Idle -> Fetching -> Comparing -> UpToDate ----------------------> Recorded
//!                              \-> FastForwarding -> Merged ------> Recorded
//!                              \-> Merging -> Merged | Conflicted -> Recorded
//! any state -> Error -> Recorded
//! ```
//!
//! Failures never escape [`SyncEngine::sync`]; they become `Error` results.

use std::sync::Arc;

use forksync_state::{
    RepoId, SyncErrorDetail, SyncErrorKind, SyncOutcome, SyncResult, TrackedRepository,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::metrics::METRICS;
use crate::obs;
use crate::ports::{Divergence, GitOperations, MergeMode, MergeOutcome};
use crate::provider::{ApiFacade, CallError, Provider, ProviderError};
use crate::store::RepositoryStateStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Fetching,
    Comparing,
    UpToDate,
    FastForwarding,
    Merging,
    Merged,
    Conflicted,
    Error,
    Recorded,
}

impl SyncPhase {
    pub fn can_transition_to(self, next: SyncPhase) -> bool {
        use SyncPhase::*;
        match (self, next) {
            (Recorded, _) => false,
            (Error, Recorded) => true,
            (Error, _) => false,
            (_, Error) => true,
            (Idle, Fetching)
            | (Fetching, Comparing)
            | (Comparing, UpToDate)
            | (Comparing, FastForwarding)
            | (Comparing, Merging)
            | (FastForwarding, Merged)
            | (Merging, Merged)
            | (Merging, Conflicted)
            | (UpToDate, Recorded)
            | (Merged, Recorded)
            | (Conflicted, Recorded) => true,
            _ => false,
        }
    }
}

/// Phases visited by one sync, in order.
#[derive(Debug, Clone)]
struct PhaseTrace {
    repo: RepoId,
    phases: Vec<SyncPhase>,
}

impl PhaseTrace {
    fn new(repo: RepoId) -> Self {
        Self {
            repo,
            phases: vec![SyncPhase::Idle],
        }
    }

    fn current(&self) -> SyncPhase {
        self.phases.last().copied().unwrap_or(SyncPhase::Idle)
    }

    fn advance(&mut self, next: SyncPhase) {
        let from = self.current();
        if !from.can_transition_to(next) {
            tracing::warn!(repo = %self.repo, ?from, to = ?next, "unexpected sync transition");
        }
        debug!(repo = %self.repo, ?from, to = ?next, "sync transition");
        self.phases.push(next);
    }
}

/// A failure on the way to a terminal state.
struct Failure {
    kind: SyncErrorKind,
    message: String,
    upstream_head: Option<String>,
}

impl Failure {
    fn from_call(err: CallError, upstream_head: Option<String>) -> Self {
        Self {
            kind: err.sync_kind(),
            message: err.to_string(),
            upstream_head,
        }
    }

    fn from_local(operation: &str, err: ProviderError, upstream_head: &str) -> Self {
        let kind = match err {
            ProviderError::Timeout(_) => SyncErrorKind::Unavailable,
            _ => SyncErrorKind::Git,
        };
        Self {
            kind,
            message: format!("{operation}: {err}"),
            upstream_head: Some(upstream_head.to_string()),
        }
    }
}

pub struct SyncEngine {
    git: Arc<dyn GitOperations>,
    facade: Arc<ApiFacade>,
    store: Arc<RepositoryStateStore>,
}

impl SyncEngine {
    pub fn new(
        git: Arc<dyn GitOperations>,
        facade: Arc<ApiFacade>,
        store: Arc<RepositoryStateStore>,
    ) -> Self {
        Self { git, facade, store }
    }

    pub fn store(&self) -> &Arc<RepositoryStateStore> {
        &self.store
    }

    pub fn facade(&self) -> &Arc<ApiFacade> {
        &self.facade
    }

    /// Synchronize one repository and record the outcome.
    pub async fn sync(&self, id: &RepoId) -> SyncResult {
        self.sync_traced(id).await.0
    }

    /// Like [`sync`](Self::sync), also returning the phases visited.
    #[instrument(skip(self), fields(repo = %id))]
    pub async fn sync_traced(&self, id: &RepoId) -> (SyncResult, Vec<SyncPhase>) {
        let started_at = self.facade.clock().now();
        let mut trace = PhaseTrace::new(id.clone());

        let Some(repo) = self.store.get(id) else {
            trace.advance(SyncPhase::Error);
            let result = SyncResult::failed(
                id.clone(),
                SyncErrorKind::NotRegistered,
                format!("repository {id} is not registered"),
                started_at,
            );
            obs::emit_sync_failed(id, SyncErrorKind::NotRegistered, &"not registered");
            METRICS.inc_sync_errors();
            return (result, trace.phases);
        };

        let result = match self.run(&repo, &mut trace, started_at).await {
            Ok(result) => result,
            Err(failure) => {
                trace.advance(SyncPhase::Error);
                obs::emit_sync_failed(id, failure.kind, &failure.message);
                SyncResult {
                    repo: id.clone(),
                    status: SyncOutcome::Error,
                    commits_behind: 0,
                    commits_ahead: 0,
                    conflicted_paths: Vec::new(),
                    upstream_head: failure.upstream_head,
                    error: Some(SyncErrorDetail {
                        kind: failure.kind,
                        message: failure.message,
                    }),
                    started_at,
                    finished_at: self.facade.clock().now(),
                }
            }
        };

        let result = match self.store.record_sync_result(id, result.clone()).await {
            Ok(_) => result,
            Err(e) => {
                if trace.current() != SyncPhase::Error {
                    trace.advance(SyncPhase::Error);
                }
                obs::emit_sync_failed(id, SyncErrorKind::Storage, &e);
                SyncResult {
                    status: SyncOutcome::Error,
                    error: Some(SyncErrorDetail {
                        kind: SyncErrorKind::Storage,
                        message: format!("recording result failed: {e}"),
                    }),
                    ..result
                }
            }
        };
        trace.advance(SyncPhase::Recorded);

        METRICS.inc_repos_synced();
        match result.status {
            SyncOutcome::Conflicted => METRICS.inc_sync_conflicts(),
            SyncOutcome::Error => METRICS.inc_sync_errors(),
            _ => {}
        }
        obs::emit_sync_finished(
            id,
            result.status,
            result.commits_behind,
            result.commits_ahead,
        );
        (result, trace.phases)
    }

    async fn run(
        &self,
        repo: &TrackedRepository,
        trace: &mut PhaseTrace,
        started_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<SyncResult, Failure> {
        trace.advance(SyncPhase::Fetching);
        let head = self
            .facade
            .call(Provider::GitRemote, "fetch_upstream", || {
                self.git.fetch_upstream(repo)
            })
            .await
            .map_err(|e| Failure::from_call(e, None))?;

        trace.advance(SyncPhase::Comparing);
        let done = |status: SyncOutcome, divergence: Divergence, paths: Vec<String>| SyncResult {
            repo: repo.id.clone(),
            status,
            commits_behind: divergence.behind,
            commits_ahead: divergence.ahead,
            conflicted_paths: paths,
            upstream_head: Some(head.commit.clone()),
            error: None,
            started_at,
            finished_at: self.facade.clock().now(),
        };

        if repo.last_upstream_commit.as_deref() == Some(head.commit.as_str()) {
            trace.advance(SyncPhase::UpToDate);
            return Ok(done(
                SyncOutcome::UpToDate,
                Divergence {
                    ahead: 0,
                    behind: 0,
                },
                Vec::new(),
            ));
        }

        let divergence = self
            .local("divergence", &head.commit, self.git.divergence(repo, &head.commit))
            .await?;

        if divergence.behind == 0 {
            trace.advance(SyncPhase::UpToDate);
            return Ok(done(SyncOutcome::UpToDate, divergence, Vec::new()));
        }

        let (phase, mode) = if divergence.ahead == 0 {
            (SyncPhase::FastForwarding, MergeMode::FastForwardOnly)
        } else {
            (SyncPhase::Merging, MergeMode::Merge)
        };
        trace.advance(phase);

        let outcome = self
            .local(
                "merge",
                &head.commit,
                self.git.merge_or_fast_forward(repo, &head.commit, mode),
            )
            .await?;

        match outcome {
            MergeOutcome::Merged { head: merged } => {
                debug!(repo = %repo.id, merged = %merged, "merge complete");
                trace.advance(SyncPhase::Merged);
                Ok(done(SyncOutcome::Merged, divergence, Vec::new()))
            }
            MergeOutcome::Conflicted { paths } if !paths.is_empty() => {
                if phase == SyncPhase::FastForwarding {
                    return Err(Failure {
                        kind: SyncErrorKind::Git,
                        message: "fast-forward reported conflicts".to_string(),
                        upstream_head: Some(head.commit.clone()),
                    });
                }
                trace.advance(SyncPhase::Conflicted);
                obs::emit_sync_conflicted(&repo.id, &paths);
                Ok(done(SyncOutcome::Conflicted, divergence, paths))
            }
            MergeOutcome::Conflicted { .. } => Err(Failure {
                kind: SyncErrorKind::Git,
                message: "merge failed without reporting conflicted paths".to_string(),
                upstream_head: Some(head.commit.clone()),
            }),
        }
    }

    /// Local git work: bounded by the call timeout, not rate limited.
    async fn local<T>(
        &self,
        operation: &str,
        upstream_head: &str,
        fut: impl std::future::Future<Output = Result<T, ProviderError>>,
    ) -> Result<T, Failure> {
        let timeout = self.facade.call_timeout();
        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(Failure::from_local(operation, e, upstream_head)),
            Err(_) => Err(Failure::from_local(
                operation,
                ProviderError::Timeout(timeout),
                upstream_head,
            )),
        }
    }
}
