//! Engine configuration.
//!
//! Every field carries a serde default so a partial JSON file (or none at
//! all) yields a usable config. Call [`EngineConfig::validate`] before use.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ForkSyncError, Result};
use crate::provider::Provider;

const WEIGHT_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub concurrency_limit: usize,
    pub retry: RetryConfig,
    pub call_timeout_ms: u64,
    pub rate_limit: RateLimitConfig,
    pub cache_ttl_seconds: u64,
    pub max_issue_pages: u32,
    pub history_limit: usize,
    pub recency_half_life_days: f64,
    pub health_weights: HealthWeights,
    pub ranking_weights: RankingWeights,
    pub budget: BudgetConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 4,
            retry: RetryConfig::default(),
            call_timeout_ms: 30_000,
            rate_limit: RateLimitConfig::default(),
            cache_ttl_seconds: 86_400,
            max_issue_pages: 3,
            history_limit: 20,
            recency_half_life_days: 30.0,
            health_weights: HealthWeights::default(),
            ranking_weights: RankingWeights::default(),
            budget: BudgetConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency_limit == 0 {
            return Err(invalid("concurrency_limit must be at least 1"));
        }
        if self.call_timeout_ms == 0 {
            return Err(invalid("call_timeout_ms must be positive"));
        }
        if self.max_issue_pages == 0 {
            return Err(invalid("max_issue_pages must be at least 1"));
        }
        if self.history_limit == 0 {
            return Err(invalid("history_limit must be at least 1"));
        }
        if !self.recency_half_life_days.is_finite() || self.recency_half_life_days <= 0.0 {
            return Err(invalid("recency_half_life_days must be positive"));
        }
        self.retry.validate()?;
        self.rate_limit.validate()?;
        self.health_weights.validate()?;
        self.ranking_weights.validate()?;
        self.budget.validate()
    }
}

fn invalid(msg: impl Into<String>) -> ForkSyncError {
    ForkSyncError::InvalidConfig(msg.into())
}

fn check_weights(section: &str, weights: &[(&str, f64)]) -> Result<()> {
    for (name, w) in weights {
        if !w.is_finite() || *w < 0.0 {
            return Err(invalid(format!("{section}.{name} must be a non-negative number")));
        }
    }
    let total: f64 = weights.iter().map(|(_, w)| w).sum();
    if (total - 1.0).abs() > WEIGHT_TOLERANCE {
        return Err(invalid(format!("{section} must sum to 1.0, got {total}")));
    }
    Ok(())
}

/// Retry policy for facade calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            jitter: true,
        }
    }
}

impl RetryConfig {
    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(invalid("retry.max_attempts must be at least 1"));
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(invalid("retry.backoff_max_ms must be >= retry.backoff_base_ms"));
        }
        Ok(())
    }
}

/// What to do with a caller while its provider is blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitMode {
    /// Wait until the declared reset, then proceed.
    #[default]
    Queue,
    /// Fail fast with `RateLimitExceeded`.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub mode: RateLimitMode,
    pub window_secs: u64,
    pub window_capacity: WindowCapacity,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            mode: RateLimitMode::Queue,
            window_secs: 3600,
            window_capacity: WindowCapacity::default(),
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.window_secs == 0 {
            return Err(invalid("rate_limit.window_secs must be positive"));
        }
        for provider in Provider::ALL {
            if self.window_capacity.for_provider(provider) == 0 {
                return Err(invalid(format!(
                    "rate_limit.window_capacity.{provider} must be at least 1"
                )));
            }
        }
        Ok(())
    }
}

/// Calls expected to fit in one window per provider.
///
/// Advisory: it sizes fan-out through `suggested_parallelism` and never
/// blocks a call on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowCapacity {
    pub git_remote: u32,
    pub issue_tracker: u32,
    pub llm: u32,
}

impl Default for WindowCapacity {
    fn default() -> Self {
        Self {
            git_remote: 60,
            issue_tracker: 5000,
            llm: 50,
        }
    }
}

impl WindowCapacity {
    pub fn for_provider(&self, provider: Provider) -> u32 {
        match provider {
            Provider::GitRemote => self.git_remote,
            Provider::IssueTracker => self.issue_tracker,
            Provider::Llm => self.llm,
        }
    }
}

/// Weights of the health signals; must sum to 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthWeights {
    pub staleness: f64,
    pub conflict: f64,
    pub issue_velocity: f64,
    pub ci: f64,
}

impl Default for HealthWeights {
    fn default() -> Self {
        Self {
            staleness: 0.35,
            conflict: 0.25,
            issue_velocity: 0.15,
            ci: 0.25,
        }
    }
}

impl HealthWeights {
    pub fn validate(&self) -> Result<()> {
        check_weights(
            "health_weights",
            &[
                ("staleness", self.staleness),
                ("conflict", self.conflict),
                ("issue_velocity", self.issue_velocity),
                ("ci", self.ci),
            ],
        )
    }
}

/// Weights of the ranking components; must sum to 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingWeights {
    pub relevance: f64,
    pub health: f64,
    pub recency: f64,
    pub skill_match: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            relevance: 0.55,
            health: 0.2,
            recency: 0.15,
            skill_match: 0.1,
        }
    }
}

impl RankingWeights {
    pub fn validate(&self) -> Result<()> {
        check_weights(
            "ranking_weights",
            &[
                ("relevance", self.relevance),
                ("health", self.health),
                ("recency", self.recency),
                ("skill_match", self.skill_match),
            ],
        )
    }
}

/// LLM spend limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub max_cost_per_request_usd: f64,
    pub max_run_cost_usd: f64,
    pub cost_per_1k_tokens_usd: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_cost_per_request_usd: 0.10,
            max_run_cost_usd: 2.0,
            cost_per_1k_tokens_usd: 0.003,
        }
    }
}

impl BudgetConfig {
    fn validate(&self) -> Result<()> {
        for (name, v) in [
            ("max_cost_per_request_usd", self.max_cost_per_request_usd),
            ("max_run_cost_usd", self.max_run_cost_usd),
            ("cost_per_1k_tokens_usd", self.cost_per_1k_tokens_usd),
        ] {
            if !v.is_finite() || v < 0.0 {
                return Err(invalid(format!("budget.{name} must be a non-negative number")));
            }
        }
        Ok(())
    }
}
