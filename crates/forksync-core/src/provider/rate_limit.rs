//! Per-provider call windows.
//!
//! One mutex guards every provider's window so the check-and-count in
//! [`RateLimitTracker::try_acquire`] is atomic across all concurrent callers.
//! Only a provider's own signal (a rate-limit error or reported zero quota)
//! blocks callers; the local call count feeds
//! [`RateLimitTracker::suggested_parallelism`] and nothing else.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Provider;
use crate::config::RateLimitConfig;

/// Quota a provider reported alongside a successful response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitInfo {
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

/// Point-in-time view of one provider's window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub provider: Provider,
    pub capacity: u32,
    pub used: u32,
    pub window_resets_at: DateTime<Utc>,
    pub blocked_until: Option<DateTime<Utc>>,
    pub reported: Option<RateLimitInfo>,
    pub tokens_used: u64,
}

impl RateLimitSnapshot {
    /// Calls still available, the tighter of our count and the provider's.
    pub fn remaining(&self) -> u32 {
        let local = self.capacity.saturating_sub(self.used);
        match &self.reported {
            Some(info) => local.min(info.remaining),
            None => local,
        }
    }
}

#[derive(Debug)]
struct Window {
    capacity: u32,
    started: DateTime<Utc>,
    used: u32,
    blocked_until: Option<DateTime<Utc>>,
    reported: Option<RateLimitInfo>,
    tokens_used: u64,
}

impl Window {
    fn roll(&mut self, now: DateTime<Utc>, length: chrono::Duration) {
        if now >= self.started + length {
            self.started = now;
            self.used = 0;
            self.tokens_used = 0;
        }
        if self.blocked_until.is_some_and(|until| until <= now) {
            self.blocked_until = None;
        }
        if self.reported.as_ref().is_some_and(|r| r.reset_at <= now) {
            self.reported = None;
        }
    }

    fn block(&mut self, until: DateTime<Utc>) {
        self.blocked_until = Some(match self.blocked_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });
    }
}

pub struct RateLimitTracker {
    length: chrono::Duration,
    windows: Mutex<HashMap<Provider, Window>>,
}

impl RateLimitTracker {
    pub fn new(config: &RateLimitConfig, now: DateTime<Utc>) -> Self {
        let windows = Provider::ALL
            .into_iter()
            .map(|p| {
                (
                    p,
                    Window {
                        capacity: config.window_capacity.for_provider(p),
                        started: now,
                        used: 0,
                        blocked_until: None,
                        reported: None,
                        tokens_used: 0,
                    },
                )
            })
            .collect();
        Self {
            length: chrono::Duration::from_std(config.window())
                .unwrap_or(chrono::Duration::hours(1)),
            windows: Mutex::new(windows),
        }
    }

    fn with_window<R>(
        &self,
        provider: Provider,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut Window) -> R,
    ) -> Option<R> {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let window = windows.get_mut(&provider)?;
        window.roll(now, self.length);
        Some(f(window))
    }

    /// Count one call against the window, or return the instant the caller
    /// must wait for when the provider has signalled a limit.
    pub fn try_acquire(&self, provider: Provider, now: DateTime<Utc>) -> Result<(), DateTime<Utc>> {
        self.with_window(provider, now, |w| {
            if let Some(until) = w.blocked_until {
                return Err(until);
            }
            if let Some(reset_at) = w
                .reported
                .as_ref()
                .filter(|r| r.remaining == 0)
                .map(|r| r.reset_at)
            {
                w.block(reset_at);
                return Err(reset_at);
            }
            w.used = w.used.saturating_add(1);
            Ok(())
        })
        .unwrap_or(Ok(()))
    }

    /// Block a provider until `until`. An existing later block wins.
    pub fn block_until(&self, provider: Provider, until: DateTime<Utc>, now: DateTime<Utc>) {
        self.with_window(provider, now, |w| w.block(until));
    }

    pub fn record_info(&self, provider: Provider, info: RateLimitInfo, now: DateTime<Utc>) {
        self.with_window(provider, now, |w| {
            if info.remaining == 0 && info.reset_at > now {
                w.block(info.reset_at);
            }
            w.reported = Some(info);
        });
    }

    pub fn record_tokens(&self, provider: Provider, tokens: u64, now: DateTime<Utc>) {
        self.with_window(provider, now, |w| {
            w.tokens_used = w.tokens_used.saturating_add(tokens);
        });
    }

    pub fn snapshot(&self, provider: Provider, now: DateTime<Utc>) -> Option<RateLimitSnapshot> {
        let length = self.length;
        self.with_window(provider, now, |w| RateLimitSnapshot {
            provider,
            capacity: w.capacity,
            used: w.used,
            window_resets_at: w.started + length,
            blocked_until: w.blocked_until,
            reported: w.reported.clone(),
            tokens_used: w.tokens_used,
        })
    }

    /// How many workers to run against `provider` right now: never more than
    /// `requested` or the remaining quota, never less than one.
    pub fn suggested_parallelism(
        &self,
        provider: Provider,
        requested: usize,
        now: DateTime<Utc>,
    ) -> usize {
        let requested = requested.max(1);
        match self.snapshot(provider, now) {
            Some(s) if s.blocked_until.is_some() => 1,
            Some(s) => requested.min(s.remaining() as usize).max(1),
            None => requested,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WindowCapacity;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn tracker(git_capacity: u32) -> RateLimitTracker {
        let cfg = RateLimitConfig {
            window_secs: 60,
            window_capacity: WindowCapacity {
                git_remote: git_capacity,
                ..WindowCapacity::default()
            },
            ..RateLimitConfig::default()
        };
        RateLimitTracker::new(&cfg, t0())
    }

    #[test]
    fn exhausted_window_narrows_parallelism_without_blocking() {
        let t = tracker(2);
        for _ in 0..5 {
            assert!(t.try_acquire(Provider::GitRemote, t0()).is_ok());
        }
        let snap = t.snapshot(Provider::GitRemote, t0()).unwrap();
        assert_eq!(snap.used, 5);
        assert_eq!(snap.remaining(), 0);
        assert!(snap.blocked_until.is_none());
        assert_eq!(t.suggested_parallelism(Provider::GitRemote, 8, t0()), 1);

        // The count resets with the window.
        let later = t0() + chrono::Duration::seconds(61);
        assert_eq!(t.suggested_parallelism(Provider::GitRemote, 8, later), 2);
    }

    #[test]
    fn explicit_block_holds_until_reset() {
        let t = tracker(10);
        let reset = t0() + chrono::Duration::seconds(5);
        t.block_until(Provider::IssueTracker, reset, t0());
        assert_eq!(t.try_acquire(Provider::IssueTracker, t0()), Err(reset));
        assert_eq!(
            t.try_acquire(Provider::IssueTracker, t0() + chrono::Duration::seconds(4)),
            Err(reset)
        );
        assert!(t.try_acquire(Provider::IssueTracker, reset).is_ok());
    }

    #[test]
    fn later_block_is_not_shortened() {
        let t = tracker(10);
        let far = t0() + chrono::Duration::seconds(30);
        t.block_until(Provider::Llm, far, t0());
        t.block_until(Provider::Llm, t0() + chrono::Duration::seconds(5), t0());
        assert_eq!(t.try_acquire(Provider::Llm, t0()), Err(far));
    }

    #[test]
    fn reported_exhaustion_blocks() {
        let t = tracker(10);
        let reset = t0() + chrono::Duration::seconds(10);
        t.record_info(
            Provider::IssueTracker,
            RateLimitInfo {
                remaining: 0,
                reset_at: reset,
            },
            t0(),
        );
        assert_eq!(t.try_acquire(Provider::IssueTracker, t0()), Err(reset));
    }

    #[test]
    fn parallelism_follows_remaining_quota() {
        let t = tracker(3);
        assert_eq!(t.suggested_parallelism(Provider::GitRemote, 8, t0()), 3);
        t.try_acquire(Provider::GitRemote, t0()).unwrap();
        t.try_acquire(Provider::GitRemote, t0()).unwrap();
        assert_eq!(t.suggested_parallelism(Provider::GitRemote, 8, t0()), 1);
        assert_eq!(t.suggested_parallelism(Provider::IssueTracker, 4, t0()), 4);
        assert_eq!(t.suggested_parallelism(Provider::IssueTracker, 0, t0()), 1);
    }

    #[test]
    fn tokens_accumulate_in_snapshot() {
        let t = tracker(3);
        t.record_tokens(Provider::Llm, 1200, t0());
        t.record_tokens(Provider::Llm, 300, t0());
        let snap = t.snapshot(Provider::Llm, t0()).unwrap();
        assert_eq!(snap.tokens_used, 1500);
    }
}
