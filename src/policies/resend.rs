//! # Message-level resend policy.
//!
//! [`ResendPolicy`] governs how often the writer re-sends one message on the
//! *same* session before falling back to a reconnect. It only applies outside a
//! consistent region.

use std::time::Duration;

use serde::Deserialize;

use crate::config::millis;

/// Same-session resend count and fixed delay between resends.
///
/// Default: no resends, no delay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ResendPolicy {
    /// Resends after the first failed send.
    #[serde(default)]
    pub max_retries: u32,
    /// Pause before each resend (milliseconds when deserialized).
    #[serde(default, deserialize_with = "millis::deserialize")]
    pub delay: Duration,
}

impl ResendPolicy {
    /// Returns the delay before resend number `resent + 1`, or `None` when exhausted.
    pub fn next_delay(&self, resent: u32) -> Option<Duration> {
        (resent < self.max_retries).then_some(self.delay)
    }
}
