//! Retry accounting for failed deliveries.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Default attempts before a notification is marked failed.
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay before the first retry (30 seconds).
const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(30);

/// Default cap on the retry delay (1 hour).
const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(3600);

/// How many attempts a notification gets and how long to wait between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after which the record is terminally failed. Never below 1.
    pub max_attempts: u32,
    /// Delay after the first failure, doubled for every further failure.
    /// Zero retries on the next pass.
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base: Duration, backoff_max: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
            backoff_max,
        }
    }

    /// Retry on whichever pass runs next, with no delay.
    pub fn without_backoff(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    /// Whether `attempts` (already counting the latest attempt) uses up the budget.
    pub fn is_exhausted(&self, attempts: i32) -> bool {
        u32::try_from(attempts).is_ok_and(|a| a >= self.max_attempts)
    }

    /// Delay before the next attempt after `attempts` failed attempts.
    pub fn backoff(&self, attempts: i32) -> Duration {
        if self.backoff_base.is_zero() || attempts < 1 {
            return Duration::ZERO;
        }
        let exponent = u32::try_from(attempts - 1).unwrap_or(u32::MAX);
        let factor = 2u32.saturating_pow(exponent);
        self.backoff_base.saturating_mul(factor).min(self.backoff_max)
    }

    /// Earliest retry time, or `None` when retries are not delayed.
    ///
    /// Delays past the representable time range clamp to the latest
    /// representable instant.
    pub fn next_attempt_at(&self, attempts: i32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let delay = self.backoff(attempts);
        if delay.is_zero() {
            return None;
        }
        let at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Some(at)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX)
    }
}
