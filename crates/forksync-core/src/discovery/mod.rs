//! Contribution Discovery & Ranking Engine.
//!
//! Fetch open issues per tracked fork, analyze each against a skill profile
//! (through a shared, coalescing cache), then rank deterministically.

pub mod budget;
pub mod cache;
pub mod engine;
pub mod profile;
pub mod ranking;

pub use budget::{BudgetSnapshot, CostBudget};
pub use cache::{cache_key, AnalysisCache, AnalysisCacheEntry, CacheOutcome};
pub use engine::{DiscoveryEngine, DiscoveryReport, FailedRepository, SkippedCandidate};
pub use profile::{canonical_label, SkillProfile};
pub use ranking::{rank, Opportunity, ScoreInputs, ScoringPolicy, WeightedScoring};

use crate::provider::CallError;

/// Why one candidate was left out of the ranking.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnalysisFailure {
    #[error("analysis call failed: {0}")]
    Provider(CallError),

    #[error("over budget (estimated ${estimated_usd:.4}): {reason}")]
    BudgetExceeded { estimated_usd: f64, reason: String },

    #[error("analysis output rejected: {0}")]
    InvalidOutput(String),
}

impl AnalysisFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisFailure::Provider(CallError::AuthenticationError { .. }) => "authentication",
            AnalysisFailure::Provider(CallError::RateLimitExceeded { .. }) => "rate_limited",
            AnalysisFailure::Provider(_) => "provider",
            AnalysisFailure::BudgetExceeded { .. } => "budget_exceeded",
            AnalysisFailure::InvalidOutput(_) => "invalid_output",
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, AnalysisFailure::Provider(e) if e.is_fatal())
    }
}
