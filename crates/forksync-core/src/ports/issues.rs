use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use forksync_state::{ContentDigest, TrackedRepository};
use serde::{Deserialize, Serialize};

use crate::provider::{ProviderError, RateLimitInfo};

/// `(repository, issue number)` as the tracker knows it.
///
/// Ordering is by repository then number, which is the ranking tie-break.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IssueIdentity {
    pub repo: String,
    pub number: u64,
}

impl IssueIdentity {
    pub fn new(repo: impl Into<String>, number: u64) -> Self {
        Self {
            repo: repo.into(),
            number,
        }
    }
}

impl std::fmt::Display for IssueIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.repo, self.number)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueCandidate {
    pub identity: IssueIdentity,
    pub title: String,
    pub labels: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub body: String,
    #[serde(default)]
    pub url: Option<String>,
}

impl IssueCandidate {
    /// Digest of everything the analysis reads. Timestamps are excluded.
    pub fn content_fingerprint(&self) -> ContentDigest {
        let labels = self.labels.iter().cloned().collect::<Vec<_>>().join("\n");
        ContentDigest::from_parts([self.title.as_bytes(), labels.as_bytes(), self.body.as_bytes()])
    }

    /// Text handed to the analyzer.
    pub fn analysis_text(&self) -> String {
        let labels = self.labels.iter().cloned().collect::<Vec<_>>().join(", ");
        format!(
            "Issue: {}\nTitle: {}\nLabels: {}\n\n{}",
            self.identity, self.title, labels, self.body
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IssuePage {
    pub issues: Vec<IssueCandidate>,
    pub next_page: Option<String>,
    /// Quota the tracker reported with this page, if any.
    pub rate_limit: Option<RateLimitInfo>,
}

#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// One page of open issues (pull requests excluded).
    async fn list_open_issues(
        &self,
        repo: &TrackedRepository,
        page_token: Option<&str>,
    ) -> Result<IssuePage, ProviderError>;
}
