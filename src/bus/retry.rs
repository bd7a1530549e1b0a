// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Backoff policy for bus connection attempts.

use std::time::Duration;

/// Linear backoff for connecting to the bus daemon.
///
/// The n-th consecutive failure waits `step * n`, capped at
/// `step * max_steps`. Retrying never stops: the daemon may simply not be up
/// yet.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use sensor_bridge::bus::RetryPolicy;
///
/// let policy = RetryPolicy::new()
///     .with_step(Duration::from_secs(2))
///     .with_max_steps(3);
///
/// assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
/// assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(6));
/// assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(6));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Increment added per failed attempt.
    pub step: Duration,
    /// Attempt count after which the delay stops growing.
    pub max_steps: u32,
}

impl RetryPolicy {
    /// Creates a policy with default settings (5 s steps, up to 60 steps).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-attempt increment.
    #[must_use]
    pub fn with_step(mut self, step: Duration) -> Self {
        self.step = step;
        self
    }

    /// Sets the attempt count after which the delay stays constant.
    #[must_use]
    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Returns the wait after the given number of consecutive failures.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt.min(self.max_steps))
    }

    /// Returns the longest wait this policy produces.
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.delay_for_attempt(self.max_steps)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            step: Duration::from_secs(5),
            max_steps: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.step, Duration::from_secs(5));
        assert_eq!(policy.max_steps, 60);
        assert_eq!(policy.max_delay(), Duration::from_secs(300));
    }

    #[test]
    fn delay_grows_linearly() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(12), Duration::from_secs(60));
    }

    #[test]
    fn delay_capped_after_max_steps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(60), policy.max_delay());
        assert_eq!(policy.delay_for_attempt(61), policy.max_delay());
        assert_eq!(policy.delay_for_attempt(u32::MAX), policy.max_delay());
    }

    #[test]
    fn zero_attempts_wait_nothing() {
        assert_eq!(RetryPolicy::default().delay_for_attempt(0), Duration::ZERO);
    }

    #[test]
    fn builder_chain() {
        let policy = RetryPolicy::new()
            .with_step(Duration::from_millis(100))
            .with_max_steps(4);
        assert_eq!(policy.max_delay(), Duration::from_millis(400));
    }
}
