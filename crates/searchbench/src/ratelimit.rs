//! Per-provider request pacing
//!
//! A [`RateLimiter`] is a GCRA bucket of size one built on `governor`: the first
//! caller is admitted immediately and later grants are spaced `1 / rate` apart.
//! A waiter holds no reservation while it sleeps, so a cancelled waiter never costs
//! the callers queued behind it a slot.

use crate::config::RateLimitConfig;
use crate::{Error, Result};
use ahash::AHashMap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::Quota;
use parking_lot::Mutex;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

type DirectRateLimiter = governor::RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Fallback rate used when a limiter is configured with a non-positive rate
const DEFAULT_RATE_PER_SECOND: f64 = 1.0;

/// Slowest pace a limiter accepts; smaller rates are raised to this one
pub const MIN_RATE_PER_SECOND: f64 = 1e-3;

pub struct RateLimiter {
    interval: Duration,
    limiter: DirectRateLimiter,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").field("interval", &self.interval).finish()
    }
}

impl RateLimiter {
    /// Create a limiter admitting `rate_per_second` calls per second
    pub fn new(rate_per_second: f64) -> Self {
        let rate = if rate_per_second.is_finite() && rate_per_second > 0.0 {
            rate_per_second.max(MIN_RATE_PER_SECOND)
        } else {
            DEFAULT_RATE_PER_SECOND
        };

        let interval = Duration::try_from_secs_f64(1.0 / rate)
            .unwrap_or(Duration::from_secs(1))
            .max(Duration::from_nanos(1));
        let quota = Quota::with_period(interval).unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN));

        Self {
            interval,
            limiter: governor::RateLimiter::direct(quota),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until this caller is granted a slot
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if `cancel` fires before a slot is granted.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        tokio::select! {
            _ = self.limiter.until_ready() => Ok(()),
            _ = cancel.cancelled() => Err(Error::Cancelled),
        }
    }
}

/// Explicitly constructed set of per-provider limiters, created once per run
#[derive(Debug)]
pub struct RateLimiterRegistry {
    config: RateLimitConfig,
    limiters: Mutex<AHashMap<String, Arc<RateLimiter>>>,
}

impl RateLimiterRegistry {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            limiters: Mutex::new(AHashMap::new()),
        }
    }

    /// Shared limiter for `provider`, created on first use
    pub fn get(&self, provider: &str) -> Arc<RateLimiter> {
        let mut limiters = self.limiters.lock();
        Arc::clone(limiters.entry(provider.to_string()).or_insert_with(|| {
            let rate = self
                .config
                .per_provider
                .get(provider)
                .copied()
                .unwrap_or(self.config.default_rps);
            tracing::debug!(provider, rate, "creating rate limiter");
            Arc::new(RateLimiter::new(rate))
        }))
    }

    pub fn len(&self) -> usize {
        self.limiters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
