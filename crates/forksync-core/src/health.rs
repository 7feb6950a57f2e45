//! Health & Signal Aggregator.
//!
//! [`compute_health`] is a pure function of its inputs; the same repository
//! and signals always give the same score. [`HealthAggregator::refresh`]
//! collects signals through the facade and writes scores through the store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use forksync_state::{RepoId, SyncOutcome, SyncResult, TrackedRepository};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::config::HealthWeights;
use crate::error::{ForkSyncError, Result};
use crate::obs;
use crate::ports::{ActivitySource, CiSignal, RepoActivity};
use crate::provider::{ApiFacade, Provider};
use crate::store::RepositoryStateStore;

/// Days of upstream silence at which the staleness component halves.
const STALENESS_HALF_DAYS: f64 = 30.0;

/// Everything [`compute_health`] reads besides the repository itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivitySignals {
    /// Instant the score is computed for. Staleness is measured against it.
    pub as_of: DateTime<Utc>,
    pub activity: RepoActivity,
    pub last_result: Option<SyncResult>,
}

/// Per-signal components, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthComponents {
    pub staleness: f64,
    pub conflict: f64,
    pub issue_velocity: f64,
    pub ci: f64,
}

impl HealthComponents {
    pub fn from_signals(repo: &TrackedRepository, signals: &ActivitySignals) -> Self {
        let staleness = match signals.activity.last_upstream_activity {
            Some(at) => {
                let days = (signals.as_of - at).num_seconds().max(0) as f64 / 86_400.0;
                1.0 / (1.0 + days / STALENESS_HALF_DAYS)
            }
            None => 0.5,
        };

        let last_status = signals
            .last_result
            .as_ref()
            .map(|r| r.status)
            .or(repo.sync_status);
        let conflict = match last_status {
            Some(SyncOutcome::Conflicted) => 0.0,
            Some(SyncOutcome::Error) => 0.5,
            _ => 1.0,
        };

        let a = &signals.activity;
        let issue_velocity = match (a.opened_last_30d, a.closed_last_30d) {
            (0, 0) if a.open_issues == 0 => 1.0,
            (0, 0) => 0.5,
            (opened, closed) => (closed as f64 / opened.max(1) as f64).min(1.0),
        };

        let ci = match a.ci {
            CiSignal::Passing => 1.0,
            CiSignal::Pending => 0.6,
            CiSignal::Unknown => 0.5,
            CiSignal::Failing => 0.0,
        };

        Self {
            staleness,
            conflict,
            issue_velocity,
            ci,
        }
    }

    pub fn weighted(&self, w: &HealthWeights) -> f64 {
        let total = w.staleness * self.staleness
            + w.conflict * self.conflict
            + w.issue_velocity * self.issue_velocity
            + w.ci * self.ci;
        (total * 100.0).clamp(0.0, 100.0)
    }
}

/// Health score in `[0, 100]`.
pub fn compute_health(
    repo: &TrackedRepository,
    signals: &ActivitySignals,
    weights: &HealthWeights,
) -> f64 {
    HealthComponents::from_signals(repo, signals).weighted(weights)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
}

impl HealthStatus {
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 80.0 => HealthStatus::Excellent,
            s if s >= 60.0 => HealthStatus::Good,
            s if s >= 40.0 => HealthStatus::Fair,
            s if s >= 20.0 => HealthStatus::Poor,
            _ => HealthStatus::Critical,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthStatus::Excellent => "excellent",
            HealthStatus::Good => "good",
            HealthStatus::Fair => "fair",
            HealthStatus::Poor => "poor",
            HealthStatus::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Fleet-wide band counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub total: usize,
    pub excellent: usize,
    pub good: usize,
    pub fair: usize,
    pub poor: usize,
    pub critical: usize,
    pub unscored: usize,
    pub average: Option<f64>,
}

impl HealthSummary {
    pub fn from_repositories(repos: &[TrackedRepository]) -> Self {
        let mut summary = HealthSummary {
            total: repos.len(),
            ..Default::default()
        };
        let scores: Vec<f64> = repos.iter().filter_map(|r| r.health_score).collect();
        summary.unscored = repos.len() - scores.len();
        for score in &scores {
            match HealthStatus::from_score(*score) {
                HealthStatus::Excellent => summary.excellent += 1,
                HealthStatus::Good => summary.good += 1,
                HealthStatus::Fair => summary.fair += 1,
                HealthStatus::Poor => summary.poor += 1,
                HealthStatus::Critical => summary.critical += 1,
            }
        }
        if !scores.is_empty() {
            summary.average = Some(scores.iter().sum::<f64>() / scores.len() as f64);
        }
        summary
    }
}

/// One repository's refresh outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub repo: RepoId,
    pub score: Option<f64>,
    pub status: Option<HealthStatus>,
    pub error: Option<String>,
}

pub struct HealthAggregator {
    facade: Arc<ApiFacade>,
    source: Arc<dyn ActivitySource>,
    store: Arc<RepositoryStateStore>,
    weights: HealthWeights,
}

impl HealthAggregator {
    pub fn new(
        facade: Arc<ApiFacade>,
        source: Arc<dyn ActivitySource>,
        store: Arc<RepositoryStateStore>,
        weights: HealthWeights,
    ) -> Self {
        Self {
            facade,
            source,
            store,
            weights,
        }
    }

    /// Recompute and store health for each id, in input order.
    ///
    /// A failed signal fetch leaves that repository's score untouched and is
    /// reported on its entry. Rejected credentials abort the refresh.
    #[instrument(skip(self, ids), fields(repos = ids.len()))]
    pub async fn refresh(
        &self,
        ids: &[RepoId],
        concurrency_limit: usize,
    ) -> Result<Vec<HealthReport>> {
        let limit = self
            .facade
            .suggested_parallelism(Provider::IssueTracker, concurrency_limit);
        let outcomes: Vec<Result<HealthReport>> = stream::iter(ids.iter().cloned())
            .map(|id| self.refresh_one(id))
            .buffered(limit)
            .collect()
            .await;
        outcomes.into_iter().collect()
    }

    async fn refresh_one(&self, id: RepoId) -> Result<HealthReport> {
        let failed = |id: RepoId, error: String| HealthReport {
            repo: id,
            score: None,
            status: None,
            error: Some(error),
        };
        let Some(repo) = self.store.get(&id) else {
            return Ok(failed(id.clone(), format!("repository {id} is not registered")));
        };
        let activity = match self
            .facade
            .call(Provider::IssueTracker, "repo_activity", || {
                self.source.activity(&repo)
            })
            .await
        {
            Ok(activity) => activity,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => return Ok(failed(id, e.to_string())),
        };
        let signals = ActivitySignals {
            as_of: self.facade.clock().now(),
            activity,
            last_result: self.store.last_result(&id),
        };
        let score = compute_health(&repo, &signals, &self.weights);
        match self.store.record_health(&id, score).await {
            Ok(()) => {}
            Err(ForkSyncError::NotRegistered(_)) => {
                return Ok(failed(id, "removed during refresh".to_string()))
            }
            Err(e) => return Err(e),
        }
        obs::emit_health_computed(&id, score);
        Ok(HealthReport {
            repo: id,
            score: Some(score),
            status: Some(HealthStatus::from_score(score)),
            error: None,
        })
    }
}
