//! Exponential reconnection backoff.
//!
//! Delays double (by default) from the initial delay up to the cap. A
//! connection only resets the sequence once it has stayed up past the
//! stability threshold, so a network that accepts and immediately drops us
//! keeps backing off.

use slobridge_core::BackoffSettings;
use std::time::Duration;

/// Tracks reconnection state for one socket.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: u32,
    stable_after: Duration,
    consecutive_failures: u32,
    current: Duration,
}

impl Backoff {
    /// Create a backoff from settings.
    #[must_use]
    pub fn new(settings: &BackoffSettings) -> Self {
        Self {
            initial: settings.initial(),
            max: settings.max(),
            multiplier: settings.multiplier.max(1),
            stable_after: settings.stable_after(),
            consecutive_failures: 0,
            current: settings.initial(),
        }
    }

    /// Record a failure and get the delay before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let delay = self.current;
        self.current = self
            .current
            .saturating_mul(self.multiplier)
            .min(self.max);
        delay
    }

    /// Record the end of a connection that lasted `uptime`.
    ///
    /// Returns `true` if the backoff was reset.
    pub fn session_ended(&mut self, uptime: Duration) -> bool {
        if uptime >= self.stable_after {
            self.reset();
            true
        } else {
            false
        }
    }

    /// Go back to the initial delay.
    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.current = self.initial;
    }

    /// Get the number of consecutive failures.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Get the delay the next failure would produce.
    #[must_use]
    pub fn current_delay(&self) -> Duration {
        self.current
    }
}
