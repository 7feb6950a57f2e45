use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ports::IssueIdentity;
use crate::provider::ProviderError;

/// An issue or pull request as the tracker reports it for its author.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthoredItem {
    pub identity: IssueIdentity,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    #[serde(default)]
    pub url: Option<String>,
    pub is_pull_request: bool,
    /// `false` while open.
    pub closed: bool,
    /// Pull requests only.
    #[serde(default)]
    pub merged: bool,
    #[serde(default)]
    pub comments: u32,
    #[serde(default)]
    pub reactions: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthoredPage {
    pub items: Vec<AuthoredItem>,
    pub next_page: Option<String>,
}

#[async_trait]
pub trait ContributionSource: Send + Sync {
    /// One page of issues and pull requests opened by `author`, any state.
    async fn authored_by(
        &self,
        author: &str,
        page_token: Option<&str>,
    ) -> Result<AuthoredPage, ProviderError>;
}
