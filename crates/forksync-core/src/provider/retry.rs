//! Retry classification: one failed attempt in, one decision out.
//!
//! Pure functions only. Waiting happens in the facade through the injected
//! clock, which is what makes the policy testable without real time.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::ProviderError;
use crate::config::RetryConfig;

/// What the facade should do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after the nominal delay (jitter is applied by the caller).
    Retry(Duration),
    /// Surface the error now.
    Fail,
    /// Block the provider until the given instant, then try again.
    DeferUntil(DateTime<Utc>),
}

/// Decide what to do after attempt number `attempt` (1-based) failed.
///
/// Non-transient errors fail immediately. Transient errors retry with
/// exponential backoff until `max_attempts` is reached. A rate-limit signal
/// defers to the declared reset while attempts remain.
pub fn classify(
    error: &ProviderError,
    attempt: u32,
    config: &RetryConfig,
    now: DateTime<Utc>,
) -> RetryDecision {
    let attempts_left = attempt < config.max_attempts;
    match error {
        ProviderError::RateLimited { reset_at } if attempts_left => {
            if *reset_at > now {
                RetryDecision::DeferUntil(*reset_at)
            } else {
                RetryDecision::Retry(backoff_delay(attempt, config))
            }
        }
        e if e.is_transient() && attempts_left => {
            RetryDecision::Retry(backoff_delay(attempt, config))
        }
        _ => RetryDecision::Fail,
    }
}

/// `base * 2^(attempt-1)`, capped at `backoff_max_ms`.
pub fn backoff_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let exp = attempt.saturating_sub(1).min(32);
    let ms = config
        .backoff_base_ms
        .saturating_mul(2u64.saturating_pow(exp))
        .min(config.backoff_max_ms);
    Duration::from_millis(ms)
}

/// Scale `delay` by `factor` (expected in [0.5, 1.5)).
pub fn apply_jitter(delay: Duration, factor: f64) -> Duration {
    if !factor.is_finite() || factor <= 0.0 {
        return delay;
    }
    delay.mul_f64(factor)
}

/// A factor in [0.5, 1.5) drawn from a v4 UUID's random bits.
pub fn random_jitter_factor() -> f64 {
    let bits = uuid::Uuid::new_v4().as_u128() as u64 >> 11;
    0.5 + (bits as f64 / (1u64 << 53) as f64)
}
