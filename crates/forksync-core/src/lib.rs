//! forksync core library
//!
//! Keeps a fleet of forks in step with their upstreams and ranks open
//! upstream issues against a contributor's skill profile.
//!
//! ## Components
//!
//! - [`ApiFacade`]: timeout, retry and rate-limit discipline for every
//!   provider call
//! - [`RepositoryStateStore`]: the single owner of tracked-repository state
//! - [`SyncEngine`] / [`BatchCoordinator`]: per-fork sync and bounded fan-out
//! - [`HealthAggregator`]: 0-100 health scores from upstream activity
//! - [`DiscoveryEngine`]: issue discovery, cached LLM analysis and ranking
//! - [`ContributionHistory`]: what the user already authored upstream, used
//!   to enrich the skill profile
//!
//! Collaborators (git, issue tracker, LLM, activity, contributions) are
//! traits in [`ports`]; live implementations are in [`adapters`], scripted
//! ones in [`fakes`].

pub mod adapters;
pub mod clock;
pub mod config;
pub mod contributions;
pub mod discovery;
pub mod error;
pub mod fakes;
pub mod health;
pub mod metrics;
pub mod obs;
pub mod ports;
pub mod provider;
pub mod store;
pub mod sync;
pub mod telemetry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    BudgetConfig, EngineConfig, HealthWeights, RankingWeights, RateLimitConfig, RateLimitMode,
    RetryConfig, WindowCapacity,
};
pub use contributions::{ContributionHistory, ContributionStats, ContributionSync};
pub use discovery::{
    AnalysisCache, AnalysisFailure, CostBudget, DiscoveryEngine, DiscoveryReport, Opportunity,
    ScoringPolicy, SkillProfile, WeightedScoring,
};
pub use error::{ForkSyncError, Result};
pub use health::{
    compute_health, ActivitySignals, HealthAggregator, HealthReport, HealthStatus, HealthSummary,
};
pub use provider::{ApiFacade, CallError, Provider, ProviderError, RateLimitTracker};
pub use store::{LoadedStore, RepositoryStateStore};
pub use sync::{BatchCoordinator, BatchSummary, CancelSignal, SyncEngine, SyncPhase};

pub use forksync_state::{
    Contribution, ContributionKind, ContributionState, FsKvStore, KvStore, RepoId, SyncErrorKind,
    SyncOutcome, SyncResult, TrackedRepository,
};
