use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use serde::{Deserialize, Serialize};

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Permits granted per refresh period.
    pub limit_for_period: u32,
    #[serde(with = "crate::config::duration_ms")]
    pub refresh_period: Duration,
    /// Longest a caller waits for a permit before failing fast.
    #[serde(with = "crate::config::duration_ms")]
    pub timeout: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit_for_period: 100,
            refresh_period: Duration::from_secs(1),
            timeout: Duration::from_millis(100),
        }
    }
}

/// Permit gate in front of upstream calls.
///
/// A full period's worth of permits is available as a burst; after that
/// permits replenish evenly across the refresh period.
pub struct RateLimitGate {
    limiter: DirectRateLimiter,
    timeout: Duration,
}

impl std::fmt::Debug for RateLimitGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitGate")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RateLimitGate {
    pub fn new(config: &RateLimitConfig) -> Self {
        let quota = quota_from_window(config.refresh_period, config.limit_for_period);
        Self {
            limiter: RateLimiter::direct(quota),
            timeout: config.timeout,
        }
    }

    /// Takes a permit if one is free right now.
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }

    /// Waits up to the configured timeout for a permit.
    pub async fn acquire(&self) -> bool {
        if self.try_acquire() {
            return true;
        }
        if self.timeout.is_zero() {
            return false;
        }
        tokio::time::timeout(self.timeout, self.limiter.until_ready())
            .await
            .is_ok()
    }
}

fn quota_from_window(window: Duration, limit: u32) -> Quota {
    let burst = NonZeroU32::new(limit).unwrap_or(NonZeroU32::MIN);

    let seconds_per_cell = (window.as_secs_f64() / f64::from(burst.get())).max(0.001);
    let period = Duration::from_secs_f64(seconds_per_cell);

    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grants_a_full_period_as_burst_then_rejects() {
        let gate = RateLimitGate::new(&RateLimitConfig {
            limit_for_period: 3,
            refresh_period: Duration::from_secs(60),
            timeout: Duration::ZERO,
        });

        assert!(gate.try_acquire());
        assert!(gate.try_acquire());
        assert!(gate.try_acquire());
        assert!(!gate.try_acquire());
    }

    #[tokio::test]
    async fn acquire_gives_up_after_timeout() {
        let gate = RateLimitGate::new(&RateLimitConfig {
            limit_for_period: 1,
            refresh_period: Duration::from_secs(60),
            timeout: Duration::from_millis(20),
        });

        assert!(gate.acquire().await);
        let started = std::time::Instant::now();
        assert!(!gate.acquire().await);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn acquire_waits_for_replenishment_within_timeout() {
        let gate = RateLimitGate::new(&RateLimitConfig {
            limit_for_period: 10,
            refresh_period: Duration::from_millis(100),
            timeout: Duration::from_millis(500),
        });

        for _ in 0..10 {
            assert!(gate.try_acquire());
        }
        assert!(gate.acquire().await);
    }
}
