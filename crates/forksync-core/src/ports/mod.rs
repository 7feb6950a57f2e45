//! Collaborator interfaces consumed by the engine.
//!
//! Each trait is one provider capability. Live implementations live in
//! [`crate::adapters`]; scripted ones in [`crate::fakes`].

pub mod activity;
pub mod contributions;
pub mod git;
pub mod issues;
pub mod llm;

pub use activity::{ActivitySource, CiSignal, RepoActivity};
pub use contributions::{AuthoredItem, AuthoredPage, ContributionSource};
pub use git::{Divergence, GitOperations, MergeMode, MergeOutcome, UpstreamHead};
pub use issues::{IssueCandidate, IssueIdentity, IssuePage, IssueTracker};
pub use llm::{AnalysisResponse, Difficulty, IssueAnalysis, LlmAnalyzer, TokenUsage};
