use async_trait::async_trait;
use chrono::{DateTime, Utc};
use forksync_state::TrackedRepository;
use serde::{Deserialize, Serialize};

use crate::provider::ProviderError;

/// Latest CI verdict on the upstream branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiSignal {
    Passing,
    Failing,
    Pending,
    #[default]
    Unknown,
}

/// Upstream activity collected for health scoring.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RepoActivity {
    pub last_upstream_activity: Option<DateTime<Utc>>,
    pub open_issues: u32,
    pub opened_last_30d: u32,
    pub closed_last_30d: u32,
    pub ci: CiSignal,
}

#[async_trait]
pub trait ActivitySource: Send + Sync {
    async fn activity(&self, repo: &TrackedRepository) -> Result<RepoActivity, ProviderError>;
}
