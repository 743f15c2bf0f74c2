//! L4: the two-tier rate-limit governor. (a) a local GCRA limiter per
//! caller identifier, gating admission before any network call; (b) an
//! adaptive per-instance limiter driven by passively observed
//! `X-RateLimit-*` response headers.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use governor::{clock::DefaultClock, state::keyed::DefaultKeyedStateStore, Quota, RateLimiter};

use crate::error::{Error, Result};
use crate::http_fetcher::RateLimitHeaders;
use crate::models::RateLimitState;

/// (a) Local outbound-caller limiter: a sliding window per caller
/// identifier, built on `governor`'s GCRA implementation the way the
/// teacher's `middleware/governor.rs` configures it, but keyed by caller
/// identifier instead of HTTP route.
pub struct LocalLimiter {
    enabled: bool,
    limiter: RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>,
}

impl LocalLimiter {
    pub fn new(enabled: bool, max: u64, window: Duration) -> Self {
        let per_window = NonZeroU32::new(max.max(1) as u32).unwrap();
        let quota = Quota::with_period(window / per_window.get())
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::new(1).unwrap()))
            .allow_burst(per_window);
        LocalLimiter {
            enabled,
            limiter: RateLimiter::keyed(quota),
        }
    }

    /// Admit a call for `caller`, or fail `LocalRateLimitExceeded`.
    pub fn check(&self, caller: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        self.limiter
            .check_key(&caller.to_string())
            .map_err(|_| Error::LocalRateLimitExceeded {
                caller: caller.to_string(),
            })
    }
}

/// (b) Adaptive per-instance limiter: a `DashMap<host, RateLimitState>`
/// updated whenever a response carries rate-limit headers, plus a
/// `Retry-After`-driven cooldown keyed the same way.
pub struct InstanceLimiter {
    table: DashMap<String, RateLimitState>,
    retry_until: DashMap<String, chrono::DateTime<chrono::Utc>>,
    backoff_ceiling: Duration,
}

impl InstanceLimiter {
    pub fn new(backoff_ceiling: Duration) -> Self {
        InstanceLimiter {
            table: DashMap::new(),
            retry_until: DashMap::new(),
            backoff_ceiling,
        }
    }

    /// Update the observed state for `host` from response headers. A
    /// response with no rate-limit headers is a no-op.
    pub fn observe(&self, host: &str, headers: &RateLimitHeaders) {
        let (Some(limit), Some(remaining), Some(reset)) =
            (headers.limit, headers.remaining, headers.reset)
        else {
            return;
        };
        self.table.insert(
            host.to_string(),
            RateLimitState {
                limit,
                remaining,
                reset,
                observed_at: chrono::Utc::now(),
            },
        );
    }

    /// Seed a hard cooldown for `host` from a 429's `Retry-After`: until it
    /// elapses, `admit` fails `InstanceRateLimited` without sleeping or
    /// touching the network (§8).
    pub fn observe_retry_after(&self, host: &str, retry_after: Duration) {
        let until = chrono::Utc::now()
            + chrono::Duration::from_std(retry_after).unwrap_or(chrono::Duration::zero());
        self.retry_until
            .entry(host.to_string())
            .and_modify(|existing| {
                if until > *existing {
                    *existing = until;
                }
            })
            .or_insert(until);
    }

    fn retry_after_remaining(&self, host: &str) -> Option<Duration> {
        let now = chrono::Utc::now();
        let entry = self.retry_until.get(host)?;
        let until = *entry;
        drop(entry);
        if until <= now {
            self.retry_until.remove(host);
            return None;
        }
        (until - now).to_std().ok()
    }

    pub fn should_backoff(&self, host: &str) -> Duration {
        let now = chrono::Utc::now();
        self.table
            .get(host)
            .map(|state| state.recommended_delay(now).min(self.backoff_ceiling))
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_rate_limited(&self, host: &str) -> bool {
        let now = chrono::Utc::now();
        self.table
            .get(host)
            .map(|state| state.is_rate_limited(now))
            .unwrap_or(false)
    }

    /// Check admission for `host`: an active `Retry-After` cooldown fails
    /// immediately with no sleep; otherwise, if within the backoff ceiling,
    /// sleep, and if beyond it (or the instance reports hard rate-limiting
    /// with no acceptable wait), fail `InstanceRateLimited`.
    pub async fn admit(&self, host: &str) -> Result<()> {
        if let Some(remaining) = self.retry_after_remaining(host) {
            return Err(Error::InstanceRateLimited {
                host: host.to_string(),
                retry_after: remaining,
            });
        }

        if self.is_rate_limited(host) {
            let delay = self.should_backoff(host);
            if delay >= self.backoff_ceiling {
                return Err(Error::InstanceRateLimited {
                    host: host.to_string(),
                    retry_after: delay,
                });
            }
        }
        let delay = self.should_backoff(host);
        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

/// Owns both tiers of the governor.
pub struct RateLimitGovernor {
    pub local: LocalLimiter,
    pub instance: Arc<InstanceLimiter>,
}

impl RateLimitGovernor {
    pub fn new(
        local_enabled: bool,
        local_max: u64,
        local_window: Duration,
        instance_backoff_ceiling: Duration,
    ) -> Self {
        RateLimitGovernor {
            local: LocalLimiter::new(local_enabled, local_max, local_window),
            instance: Arc::new(InstanceLimiter::new(instance_backoff_ceiling)),
        }
    }

    /// Consult (a) then (b), per §4.3 ordering, before a network call.
    pub async fn admit(&self, caller: &str, host: &str) -> Result<()> {
        self.local.check(caller)?;
        self.instance.admit(host).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(limit: u64, remaining: u64, reset_in: chrono::Duration) -> RateLimitHeaders {
        RateLimitHeaders {
            limit: Some(limit),
            remaining: Some(remaining),
            reset: Some(chrono::Utc::now() + reset_in),
        }
    }

    #[test]
    fn local_limiter_disabled_always_admits() {
        let limiter = LocalLimiter::new(false, 1, Duration::from_secs(60));
        assert!(limiter.check("alice").is_ok());
        assert!(limiter.check("alice").is_ok());
        assert!(limiter.check("alice").is_ok());
    }

    #[test]
    fn local_limiter_enforces_burst_cap() {
        let limiter = LocalLimiter::new(true, 2, Duration::from_secs(60));
        assert!(limiter.check("alice").is_ok());
        assert!(limiter.check("alice").is_ok());
        assert!(limiter.check("alice").is_err());
    }

    #[test]
    fn local_limiter_is_per_caller() {
        let limiter = LocalLimiter::new(true, 1, Duration::from_secs(60));
        assert!(limiter.check("alice").is_ok());
        assert!(limiter.check("bob").is_ok());
    }

    #[test]
    fn instance_limiter_no_observation_never_blocks() {
        let limiter = InstanceLimiter::new(Duration::from_secs(5));
        assert!(!limiter.is_rate_limited("example.test"));
        assert_eq!(limiter.should_backoff("example.test"), Duration::ZERO);
    }

    #[test]
    fn instance_limiter_tracks_observed_exhaustion() {
        let limiter = InstanceLimiter::new(Duration::from_secs(5));
        limiter.observe("example.test", &headers(100, 0, chrono::Duration::seconds(5)));
        assert!(limiter.is_rate_limited("example.test"));
    }

    #[tokio::test]
    async fn admit_fails_when_delay_exceeds_ceiling() {
        let limiter = InstanceLimiter::new(Duration::from_millis(1));
        limiter.observe("example.test", &headers(100, 0, chrono::Duration::seconds(30)));
        let result = limiter.admit("example.test").await;
        assert!(matches!(result, Err(Error::InstanceRateLimited { .. })));
    }

    #[tokio::test]
    async fn retry_after_blocks_admission_without_network() {
        let limiter = InstanceLimiter::new(Duration::from_secs(60));
        limiter.observe_retry_after("example.test", Duration::from_secs(7));
        let result = limiter.admit("example.test").await;
        match result {
            Err(Error::InstanceRateLimited { host, retry_after }) => {
                assert_eq!(host, "example.test");
                assert!(retry_after <= Duration::from_secs(7));
            }
            other => panic!("expected InstanceRateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn retry_after_cooldown_expires() {
        let limiter = InstanceLimiter::new(Duration::from_secs(60));
        limiter.observe_retry_after("example.test", Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(limiter.admit("example.test").await.is_ok());
    }

    #[test]
    fn retry_after_only_extends_an_existing_cooldown() {
        let limiter = InstanceLimiter::new(Duration::from_secs(60));
        limiter.observe_retry_after("example.test", Duration::from_secs(30));
        limiter.observe_retry_after("example.test", Duration::from_secs(5));
        let remaining = limiter.retry_after_remaining("example.test").unwrap();
        assert!(remaining > Duration::from_secs(20));
    }
}
