//! # Connection retry policies.
//!
//! [`RetryPolicy`] decides whether another connection attempt is made after a
//! failed one, and how long to wait before it.
//!
//! - [`RetryPolicy::NoRetry`] one attempt; failure is fatal.
//! - [`RetryPolicy::BoundedRetry`] up to `bound` additional attempts, `period` apart.
//! - [`RetryPolicy::InfiniteRetry`] retries forever, `period` apart; only shutdown stops it.
//!
//! ## Attempts
//! ```text
//! NoRetry                     → 1 attempt
//! BoundedRetry { bound: N }   → N + 1 attempts
//! InfiniteRetry               → unbounded
//! ```
//!
//! The policy governs the initial connection attempt and, outside a consistent
//! region, every later reconnection.

use std::time::Duration;

use serde::Deserialize;

use crate::config::secs;

const DEFAULT_BOUND: u32 = 5;
const DEFAULT_PERIOD: Duration = Duration::from_secs(60);

fn default_bound() -> u32 {
    DEFAULT_BOUND
}

fn default_period() -> Duration {
    DEFAULT_PERIOD
}

/// Policy controlling reconnection attempts.
///
/// Deserializes from `{"kind": "BoundedRetry", "bound": 3, "period": 2.5}`
/// (period in seconds).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind")]
pub enum RetryPolicy {
    /// A single attempt.
    NoRetry,
    /// At most `bound` retries after the first attempt.
    BoundedRetry {
        #[serde(default = "default_bound")]
        bound: u32,
        #[serde(default = "default_period", deserialize_with = "secs::deserialize")]
        period: Duration,
    },
    /// Retry until shutdown.
    InfiniteRetry {
        #[serde(default = "default_period", deserialize_with = "secs::deserialize")]
        period: Duration,
    },
}

impl RetryPolicy {
    /// Returns the delay before the next attempt, or `None` if the policy gives up.
    ///
    /// `retries` is the number of retries already made (`0` after the first failed attempt).
    ///
    /// # Example
    /// ```
    /// use std::time::Duration;
    /// use mqbridge::RetryPolicy;
    ///
    /// let policy = RetryPolicy::BoundedRetry { bound: 2, period: Duration::from_secs(1) };
    /// assert_eq!(policy.next_delay(0), Some(Duration::from_secs(1)));
    /// assert_eq!(policy.next_delay(1), Some(Duration::from_secs(1)));
    /// assert_eq!(policy.next_delay(2), None);
    /// ```
    pub fn next_delay(&self, retries: u32) -> Option<Duration> {
        match *self {
            RetryPolicy::NoRetry => None,
            RetryPolicy::BoundedRetry { bound, period } => (retries < bound).then_some(period),
            RetryPolicy::InfiniteRetry { period } => Some(period),
        }
    }

    /// Total number of attempts the policy allows (`None` = unbounded).
    pub fn max_attempts(&self) -> Option<u32> {
        match *self {
            RetryPolicy::NoRetry => Some(1),
            RetryPolicy::BoundedRetry { bound, .. } => Some(bound.saturating_add(1)),
            RetryPolicy::InfiniteRetry { .. } => None,
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RetryPolicy::NoRetry => "no_retry",
            RetryPolicy::BoundedRetry { .. } => "bounded_retry",
            RetryPolicy::InfiniteRetry { .. } => "infinite_retry",
        }
    }
}

impl Default for RetryPolicy {
    /// Returns `BoundedRetry { bound: 5, period: 60s }`.
    fn default() -> Self {
        RetryPolicy::BoundedRetry {
            bound: DEFAULT_BOUND,
            period: DEFAULT_PERIOD,
        }
    }
}
