//! Uniform call wrapper for every external provider.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};

use super::rate_limit::{RateLimitInfo, RateLimitTracker};
use super::retry::{apply_jitter, classify, random_jitter_factor, RetryDecision};
use super::{CallError, Provider, ProviderError};
use crate::clock::Clock;
use crate::config::{EngineConfig, RateLimitMode, RetryConfig};
use crate::metrics::METRICS;
use crate::obs;

/// Applies timeout, retry with backoff, and rate-limit blocking to
/// collaborator calls. Shared by every component through an `Arc`.
pub struct ApiFacade {
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
    timeout: Duration,
    mode: RateLimitMode,
    limits: RateLimitTracker,
}

impl ApiFacade {
    pub fn new(config: &EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let limits = RateLimitTracker::new(&config.rate_limit, clock.now());
        Self {
            clock,
            retry: config.retry.clone(),
            timeout: config.call_timeout(),
            mode: config.rate_limit.mode,
            limits,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn call_timeout(&self) -> Duration {
        self.timeout
    }

    pub fn limits(&self) -> &RateLimitTracker {
        &self.limits
    }

    pub fn suggested_parallelism(&self, provider: Provider, requested: usize) -> usize {
        self.limits
            .suggested_parallelism(provider, requested, self.clock.now())
    }

    /// Record quota a provider reported on a successful response.
    pub fn record_rate_limit(&self, provider: Provider, info: RateLimitInfo) {
        self.limits.record_info(provider, info, self.clock.now());
    }

    pub fn record_tokens(&self, provider: Provider, tokens: u64) {
        self.limits.record_tokens(provider, tokens, self.clock.now());
    }

    /// Run `op` under the provider's discipline.
    ///
    /// `op` is invoked once per attempt. Each attempt is bounded by the call
    /// timeout; the provider's rate-limit block is honoured before every
    /// attempt.
    #[instrument(skip(self, op), fields(provider = %provider))]
    pub async fn call<T, F, Fut>(
        &self,
        provider: Provider,
        operation: &str,
        mut op: F,
    ) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            self.wait_for_clearance(provider).await?;
            attempt += 1;
            METRICS.inc_provider_calls();

            let err = match tokio::time::timeout(self.timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_elapsed) => ProviderError::Timeout(self.timeout),
            };

            let now = self.clock.now();
            match classify(&err, attempt, &self.retry, now) {
                RetryDecision::Retry(delay) => {
                    let delay = if self.retry.jitter {
                        apply_jitter(delay, random_jitter_factor())
                    } else {
                        delay
                    };
                    METRICS.inc_provider_retries();
                    obs::emit_provider_retry(provider, operation, attempt, delay, &err);
                    self.clock.sleep(delay).await;
                }
                RetryDecision::DeferUntil(reset_at) => {
                    self.limits.block_until(provider, reset_at, now);
                    obs::emit_provider_deferred(provider, operation, reset_at);
                    if self.mode == RateLimitMode::Reject {
                        let err = CallError::RateLimitExceeded { provider, reset_at };
                        obs::emit_provider_failed(provider, operation, attempt, &err);
                        return Err(err);
                    }
                }
                RetryDecision::Fail => {
                    let err = self.terminal(provider, operation, attempt, err);
                    obs::emit_provider_failed(provider, operation, attempt, &err);
                    return Err(err);
                }
            }
        }
    }

    async fn wait_for_clearance(&self, provider: Provider) -> Result<(), CallError> {
        loop {
            match self.limits.try_acquire(provider, self.clock.now()) {
                Ok(()) => return Ok(()),
                Err(reset_at) => match self.mode {
                    RateLimitMode::Reject => {
                        return Err(CallError::RateLimitExceeded { provider, reset_at })
                    }
                    RateLimitMode::Queue => {
                        METRICS.inc_rate_limit_waits();
                        debug!(%provider, %reset_at, "waiting for rate-limit reset");
                        self.clock.sleep_until(reset_at).await;
                    }
                },
            }
        }
    }

    fn terminal(
        &self,
        provider: Provider,
        operation: &str,
        attempts: u32,
        err: ProviderError,
    ) -> CallError {
        match err {
            ProviderError::RateLimited { reset_at } => {
                self.limits.block_until(provider, reset_at, self.clock.now());
                CallError::RateLimitExceeded { provider, reset_at }
            }
            ProviderError::Authentication(detail) => {
                CallError::AuthenticationError { provider, detail }
            }
            ProviderError::Unavailable(detail) => {
                CallError::ProviderUnavailable { provider, detail }
            }
            e if e.is_transient() => CallError::TransientProviderError {
                provider,
                operation: operation.to_string(),
                attempts,
                last: e,
            },
            e => CallError::Failed {
                provider,
                operation: operation.to_string(),
                source: e,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::Utc;

    use super::*;
    use crate::clock::ManualClock;

    fn facade(clock: Arc<ManualClock>) -> ApiFacade {
        let mut cfg = EngineConfig::default();
        cfg.retry.jitter = false;
        cfg.retry.backoff_base_ms = 10;
        ApiFacade::new(&cfg, clock)
    }

    #[tokio::test]
    async fn success_passes_through() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let f = facade(clock);
        let v: u32 = f
            .call(Provider::GitRemote, "fetch", || async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(v, 7);
    }

    #[tokio::test]
    async fn unavailable_surfaces_after_retries() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let f = facade(clock.clone());
        let calls = AtomicU32::new(0);
        let err = f
            .call(Provider::IssueTracker, "list", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ProviderError::Unavailable("dns".into())) }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::ProviderUnavailable { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(10), Duration::from_millis(20)]
        );
    }

    #[tokio::test]
    async fn malformed_fails_without_retry() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let f = facade(clock.clone());
        let err = f
            .call(Provider::Llm, "analyze", || async {
                Err::<(), _>(ProviderError::Malformed("not json".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Failed { .. }));
        assert!(clock.sleeps().is_empty());
    }
}
