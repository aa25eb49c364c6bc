//! Lazy Pirate retry policy for idempotent reads.
//!
//! UDP gives no delivery guarantee and the peer has no request ids, so a
//! lost datagram looks exactly like a slow peer. Reads that are safe to
//! repeat are retried on timeout with capped exponential backoff; every
//! attempt registers a fresh waiter. Mutations are never retried.

use std::time::Duration;

use liveconf::RequestConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Timeout per attempt
    pub timeout: Duration,
    /// Extra attempts after the first one times out
    pub max_retries: u32,
    /// Initial backoff between retries
    pub backoff_base: Duration,
    /// Maximum backoff between retries (caps exponential growth)
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RequestConfig::default())
    }
}

impl From<&RequestConfig> for RetryPolicy {
    fn from(config: &RequestConfig) -> Self {
        Self {
            timeout: config.timeout(),
            max_retries: config.max_retries,
            backoff_base: config.backoff_base(),
            backoff_max: config.backoff_max(),
        }
    }
}

impl RetryPolicy {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// A single attempt, no retries.
    pub fn once(timeout: Duration) -> Self {
        Self::default().with_timeout(timeout).with_retries(0)
    }

    /// Delay before retry number `attempt`:
    /// attempt n: min(backoff_base * 2^(n-1), backoff_max)
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self.backoff_base.saturating_mul(multiplier);
        std::cmp::min(delay, self.backoff_max)
    }
}
