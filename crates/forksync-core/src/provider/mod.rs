//! Rate-limited access to external providers.
//!
//! - [`retry::classify`] decides retry / fail / defer for one failed attempt
//! - [`RateLimitTracker`] keeps per-provider call windows and reset blocks
//! - [`ApiFacade`] wraps every collaborator call with timeout, retry and
//!   rate-limit discipline

mod error;
pub mod facade;
pub mod rate_limit;
pub mod retry;

use serde::{Deserialize, Serialize};

pub use error::{CallError, ProviderError};
pub use facade::ApiFacade;
pub use rate_limit::{RateLimitInfo, RateLimitSnapshot, RateLimitTracker};
pub use retry::{backoff_delay, classify, RetryDecision};

/// The closed set of external capabilities the engine talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    GitRemote,
    IssueTracker,
    Llm,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::GitRemote, Provider::IssueTracker, Provider::Llm];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::GitRemote => "git_remote",
            Provider::IssueTracker => "issue_tracker",
            Provider::Llm => "llm",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
