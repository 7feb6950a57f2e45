//! Persisted record types
//!
//! - `TrackedRepository`: one fork under management
//! - `SyncResult`: the immutable outcome of one sync attempt
//! - `Contribution`: one issue or pull request the user authored upstream

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies a tracked repository (e.g. "octo/widgets").
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct RepoId {
    /// Canonical name, e.g. "octo/widgets".
    pub name: String,
}

impl RepoId {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for RepoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(&self.name)
    }
}

/// Terminal classification of one sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Upstream had nothing new.
    UpToDate,
    /// Upstream changes were fast-forwarded or merged cleanly.
    Merged,
    /// Automatic merge stopped on conflicting paths.
    Conflicted,
    /// The attempt failed before reaching a merge decision.
    Error,
}

impl std::fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncOutcome::UpToDate => "up_to_date",
            SyncOutcome::Merged => "merged",
            SyncOutcome::Conflicted => "conflicted",
            SyncOutcome::Error => "error",
        };
        f.pad(s)
    }
}

/// Coarse error classes carried on an `Error` outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncErrorKind {
    /// Retries exhausted on a transient provider failure.
    Transient,
    /// Provider rate limit in force and the caller chose not to wait.
    RateLimited,
    /// Credentials rejected; fatal for the run.
    Authentication,
    /// Provider unreachable or the call timed out.
    Unavailable,
    /// Git refused the operation (dirty tree, unknown ref, malformed output).
    Git,
    /// Recording the result failed.
    Storage,
    /// The id is not registered in the store.
    NotRegistered,
    /// The run was cancelled before this repository was dispatched.
    Cancelled,
    /// Anything unclassified, including a panicked worker.
    Internal,
}

impl std::fmt::Display for SyncErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncErrorKind::Transient => "transient",
            SyncErrorKind::RateLimited => "rate_limited",
            SyncErrorKind::Authentication => "authentication",
            SyncErrorKind::Unavailable => "unavailable",
            SyncErrorKind::Git => "git",
            SyncErrorKind::Storage => "storage",
            SyncErrorKind::NotRegistered => "not_registered",
            SyncErrorKind::Cancelled => "cancelled",
            SyncErrorKind::Internal => "internal",
        };
        f.pad(s)
    }
}

/// Error detail preserved on an `Error` outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncErrorDetail {
    pub kind: SyncErrorKind,
    pub message: String,
}

/// Outcome of one sync attempt for one repository. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub repo: RepoId,
    pub status: SyncOutcome,
    pub commits_behind: u32,
    pub commits_ahead: u32,
    /// Conflicted paths in the order git reported them; empty unless `Conflicted`.
    pub conflicted_paths: Vec<String>,
    /// Upstream head observed during the attempt, when the fetch succeeded.
    pub upstream_head: Option<String>,
    pub error: Option<SyncErrorDetail>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncResult {
    /// Build an `Error` result that never reached the sync engine.
    pub fn failed(
        repo: RepoId,
        kind: SyncErrorKind,
        message: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            repo,
            status: SyncOutcome::Error,
            commits_behind: 0,
            commits_ahead: 0,
            conflicted_paths: Vec::new(),
            upstream_head: None,
            error: Some(SyncErrorDetail {
                kind,
                message: message.into(),
            }),
            started_at: at,
            finished_at: at,
        }
    }

    pub fn error_kind(&self) -> Option<SyncErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

fn default_branch() -> String {
    "main".to_string()
}

/// A fork under management.
///
/// Sync fields are written only by the sync engine and `health_score` only by
/// the health aggregator, both through the repository state store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedRepository {
    pub id: RepoId,
    pub local_path: PathBuf,
    pub upstream_url: String,
    #[serde(default)]
    pub fork_url: Option<String>,
    /// Branch that tracks upstream.
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub last_sync_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_upstream_commit: Option<String>,
    /// `None` until the first sync attempt is recorded.
    #[serde(default)]
    pub sync_status: Option<SyncOutcome>,
    /// 0-100, `None` until first computed.
    #[serde(default)]
    pub health_score: Option<f64>,
    pub registered_at: DateTime<Utc>,
}

impl TrackedRepository {
    pub fn new(
        id: RepoId,
        local_path: impl Into<PathBuf>,
        upstream_url: impl Into<String>,
        registered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            local_path: local_path.into(),
            upstream_url: upstream_url.into(),
            fork_url: None,
            branch: default_branch(),
            last_sync_at: None,
            last_upstream_commit: None,
            sync_status: None,
            health_score: None,
            registered_at,
        }
    }

    pub fn with_fork_url(mut self, fork_url: impl Into<String>) -> Self {
        self.fork_url = Some(fork_url.into());
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    /// Fold a sync result into the sync fields.
    ///
    /// The last known upstream commit only advances when the fork actually
    /// contains it, so a conflicted or failed attempt is retried next run.
    pub fn apply_sync_result(&mut self, result: &SyncResult) {
        self.last_sync_at = Some(result.finished_at);
        self.sync_status = Some(result.status);
        if matches!(result.status, SyncOutcome::UpToDate | SyncOutcome::Merged) {
            if let Some(head) = &result.upstream_head {
                self.last_upstream_commit = Some(head.clone());
            }
        }
    }
}

/// Whether a contribution is an issue or a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContributionKind {
    Issue,
    PullRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContributionState {
    Open,
    Closed,
    /// Pull requests only.
    Merged,
}

impl std::fmt::Display for ContributionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContributionState::Open => "open",
            ContributionState::Closed => "closed",
            ContributionState::Merged => "merged",
        };
        f.pad(s)
    }
}

/// One issue or pull request the user authored, as last seen upstream.
///
/// Keyed by `(repo, number)`; a later sighting replaces the earlier one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    /// Upstream `owner/name`.
    pub repo: String,
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    pub kind: ContributionKind,
    pub state: ContributionState,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    /// Canonical skill names inferred from labels and text.
    #[serde(default)]
    pub skills: BTreeSet<String>,
    /// 0-1.
    pub impact: f64,
    #[serde(default)]
    pub comments: u32,
    #[serde(default)]
    pub reactions: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contribution {
    /// Storage key, e.g. `octo/widgets#12`.
    pub fn key(&self) -> String {
        format!("{}#{}", self.repo, self.number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(status: SyncOutcome, head: Option<&str>) -> SyncResult {
        let now = Utc::now();
        SyncResult {
            repo: RepoId::new("octo/widgets"),
            status,
            commits_behind: 2,
            commits_ahead: 0,
            conflicted_paths: vec![],
            upstream_head: head.map(String::from),
            error: None,
            started_at: now,
            finished_at: now,
        }
    }

    #[test]
    fn merged_result_advances_upstream_commit() {
        let mut repo = TrackedRepository::new(
            RepoId::new("octo/widgets"),
            "/tmp/widgets",
            "https://github.com/octo/widgets.git",
            Utc::now(),
        );
        repo.apply_sync_result(&result(SyncOutcome::Merged, Some("abc123")));
        assert_eq!(repo.last_upstream_commit.as_deref(), Some("abc123"));
        assert_eq!(repo.sync_status, Some(SyncOutcome::Merged));
        assert!(repo.last_sync_at.is_some());
    }

    #[test]
    fn conflicted_result_keeps_previous_upstream_commit() {
        let mut repo = TrackedRepository::new(
            RepoId::new("octo/widgets"),
            "/tmp/widgets",
            "https://github.com/octo/widgets.git",
            Utc::now(),
        );
        repo.last_upstream_commit = Some("old".to_string());
        repo.apply_sync_result(&result(SyncOutcome::Conflicted, Some("new")));
        assert_eq!(repo.last_upstream_commit.as_deref(), Some("old"));
        assert_eq!(repo.sync_status, Some(SyncOutcome::Conflicted));
    }

    #[test]
    fn tracked_repository_defaults_on_sparse_json() {
        let json = r#"{
            "id": {"name": "octo/widgets"},
            "local_path": "/src/widgets",
            "upstream_url": "https://github.com/octo/widgets.git",
            "registered_at": "2026-01-01T00:00:00Z"
        }"#;
        let repo: TrackedRepository = serde_json::from_str(json).expect("deserialize");
        assert_eq!(repo.branch, "main");
        assert!(repo.sync_status.is_none());
        assert!(repo.health_score.is_none());
    }

    #[test]
    fn failed_result_carries_kind() {
        let r = SyncResult::failed(
            RepoId::new("octo/missing"),
            SyncErrorKind::NotRegistered,
            "not tracked",
            Utc::now(),
        );
        assert_eq!(r.status, SyncOutcome::Error);
        assert_eq!(r.error_kind(), Some(SyncErrorKind::NotRegistered));
        assert!(r.conflicted_paths.is_empty());
    }

    #[test]
    fn display_honours_column_width() {
        assert_eq!(format!("{:<6}|", RepoId::new("a/b")), "a/b   |");
        assert_eq!(format!("{:<8}|", SyncOutcome::Merged), "merged  |");
    }

    #[test]
    fn outcome_serializes_snake_case() {
        let json = serde_json::to_string(&SyncOutcome::UpToDate).unwrap();
        assert_eq!(json, "\"up_to_date\"");
    }

    #[test]
    fn contribution_keys_on_repo_and_number() {
        let now = Utc::now();
        let c = Contribution {
            repo: "octo/widgets".into(),
            number: 7,
            title: "Fix typo".into(),
            url: None,
            kind: ContributionKind::PullRequest,
            state: ContributionState::Merged,
            labels: BTreeSet::new(),
            skills: BTreeSet::new(),
            impact: 0.5,
            comments: 0,
            reactions: 0,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(c.key(), "octo/widgets#7");
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["kind"], "pull_request");
        assert_eq!(json["state"], "merged");
    }
}
