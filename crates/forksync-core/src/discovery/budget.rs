//! LLM spend tracking.
//!
//! Each analysis reserves its estimated cost up front and settles to the
//! usage the provider reports. Reservations that would break the
//! per-request or cumulative cap are refused.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::AnalysisFailure;
use crate::config::BudgetConfig;
use crate::ports::TokenUsage;

const CHARS_PER_TOKEN: usize = 4;
/// Output tokens assumed when estimating before the call.
const EXPECTED_OUTPUT_TOKENS: u64 = 400;

pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() / CHARS_PER_TOKEN).max(1) as u64
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub spent_usd: f64,
    pub reserved_usd: f64,
    pub usage: TokenUsage,
    pub requests: u64,
}

/// A held estimate. Pass back to `settle` or `release`.
#[derive(Debug)]
#[must_use]
pub struct Reservation {
    estimated_usd: f64,
}

impl Reservation {
    pub fn estimated_usd(&self) -> f64 {
        self.estimated_usd
    }
}

pub struct CostBudget {
    config: BudgetConfig,
    state: Mutex<BudgetSnapshot>,
}

impl CostBudget {
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BudgetSnapshot::default()),
        }
    }

    pub fn cost_of(&self, tokens: u64) -> f64 {
        tokens as f64 / 1000.0 * self.config.cost_per_1k_tokens_usd
    }

    pub fn reserve(&self, prompt: &str) -> Result<Reservation, AnalysisFailure> {
        let estimated_usd = self.cost_of(estimate_tokens(prompt) + EXPECTED_OUTPUT_TOKENS);
        if estimated_usd > self.config.max_cost_per_request_usd {
            return Err(AnalysisFailure::BudgetExceeded {
                estimated_usd,
                reason: format!(
                    "per-request cap ${:.4}",
                    self.config.max_cost_per_request_usd
                ),
            });
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.spent_usd + state.reserved_usd + estimated_usd > self.config.max_run_cost_usd {
            return Err(AnalysisFailure::BudgetExceeded {
                estimated_usd,
                reason: format!(
                    "cumulative cap ${:.4} (spent ${:.4})",
                    self.config.max_run_cost_usd, state.spent_usd
                ),
            });
        }
        state.reserved_usd += estimated_usd;
        Ok(Reservation { estimated_usd })
    }

    /// Replace the estimate with what the call actually cost.
    pub fn settle(&self, reservation: Reservation, usage: TokenUsage) -> f64 {
        let actual = self.cost_of(usage.total());
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.reserved_usd = (state.reserved_usd - reservation.estimated_usd).max(0.0);
        state.spent_usd += actual;
        state.usage.add(usage);
        state.requests += 1;
        actual
    }

    pub fn release(&self, reservation: Reservation) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.reserved_usd = (state.reserved_usd - reservation.estimated_usd).max(0.0);
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
