//! Retry schedule for failed operations.

use std::time::Duration;

/// Exponential backoff with a plateau and a retry ceiling.
///
/// The delay after the n-th failure is `base_delay * multiplier^(n-1)`,
/// capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Failures after which an operation is quarantined
    pub max_retries: u32,
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Growth factor per further failure
    pub multiplier: u32,
    /// Upper bound for a single delay
    pub max_delay: Duration,
}

impl BackoffPolicy {
    /// Policy with the given ceiling and default delays
    pub const fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_secs(5 * 60),
            multiplier: 2,
            max_delay: Duration::from_secs(60 * 60),
        }
    }

    /// Retry immediately on every pass (tests and manual replays)
    pub const fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            multiplier: 1,
            max_delay: Duration::ZERO,
        }
    }

    /// Sets the first delay.
    #[must_use]
    pub const fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the growth factor.
    #[must_use]
    pub const fn with_multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Sets the plateau.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay to wait after `retry_count` failures. Zero failures means no delay.
    pub fn delay_for_retry(&self, retry_count: u32) -> Duration {
        if retry_count == 0 {
            return Duration::ZERO;
        }

        let factor = self
            .multiplier
            .checked_pow(retry_count - 1)
            .unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Earliest next attempt after a failure observed at `now_millis`.
    ///
    /// Never earlier than `enqueued_at`.
    pub fn next_attempt_at(&self, now_millis: i64, enqueued_at: i64, retry_count: u32) -> i64 {
        let delay = i64::try_from(self.delay_for_retry(retry_count).as_millis()).unwrap_or(i64::MAX);
        now_millis.saturating_add(delay).max(enqueued_at)
    }

    /// Whether an operation with `retry_count` failures has exhausted its budget
    pub const fn should_quarantine(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(5)
    }
}
