use async_trait::async_trait;
use forksync_state::TrackedRepository;
use serde::{Deserialize, Serialize};

use crate::provider::ProviderError;

/// Upstream branch head after a fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamHead {
    pub commit: String,
    /// Remote-tracking ref the commit was read from, e.g. `upstream/main`.
    pub reference: String,
}

/// Commit counts between the fork branch and the upstream head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Divergence {
    /// Commits on the fork not on upstream.
    pub ahead: u32,
    /// Commits on upstream not on the fork.
    pub behind: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    FastForwardOnly,
    Merge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged { head: String },
    /// Paths exactly as git listed them. The working tree is left clean.
    Conflicted { paths: Vec<String> },
}

/// Local git capability for one tracked fork.
#[async_trait]
pub trait GitOperations: Send + Sync {
    async fn fetch_upstream(&self, repo: &TrackedRepository) -> Result<UpstreamHead, ProviderError>;

    async fn divergence(
        &self,
        repo: &TrackedRepository,
        upstream_commit: &str,
    ) -> Result<Divergence, ProviderError>;

    async fn merge_or_fast_forward(
        &self,
        repo: &TrackedRepository,
        upstream_commit: &str,
        mode: MergeMode,
    ) -> Result<MergeOutcome, ProviderError>;
}
