//! Retry policy for send attempts.

use std::time::Duration;

use envoi_common::FailureKind;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// When and how often a failed unit is attempted again.
///
/// Attempts are numbered from 1. After attempt `n` fails with a retryable
/// kind the unit waits `backoff(n)` and is attempted again, up to
/// `max_retries` times.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    ///
    /// Default: 3 (at most 4 attempts)
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff (in milliseconds).
    ///
    /// The delay after attempt `n` is `base * 2^(n - 1)`.
    ///
    /// Default: 500 milliseconds
    #[serde(default = "defaults::base_delay_ms")]
    pub base_delay_ms: u64,

    /// Cap on a single backoff (in milliseconds).
    ///
    /// Default: 30000 milliseconds
    #[serde(default = "defaults::max_delay_ms")]
    pub max_delay_ms: u64,

    /// Randomize each delay within ±`jitter_factor`.
    ///
    /// Default: 0.0 (exact schedule)
    #[serde(default = "defaults::jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: defaults::max_retries(),
            base_delay_ms: defaults::base_delay_ms(),
            max_delay_ms: defaults::max_delay_ms(),
            jitter_factor: defaults::jitter_factor(),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if a unit whose attempt `attempt` just failed with
    /// `kind` should be attempted again.
    ///
    /// Terminal kinds never retry.
    #[must_use]
    pub const fn should_retry(&self, attempt: u32, kind: FailureKind) -> bool {
        kind.is_retryable() && attempt <= self.max_retries
    }

    /// Upper bound on attempts for a single unit
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay after attempt `attempt` failed, without jitter.
    ///
    /// `min(base * 2^(attempt - 1), max_delay)`
    #[must_use]
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let delay = if exponent >= 63 {
            self.max_delay_ms
        } else {
            self.base_delay_ms
                .saturating_mul(1u64 << exponent)
                .min(self.max_delay_ms)
        };

        Duration::from_millis(delay)
    }

    /// Delay after attempt `attempt` failed, with jitter applied
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.base_backoff(attempt);
        if self.jitter_factor <= 0.0 || delay.is_zero() {
            return delay;
        }

        let range = delay.as_secs_f64() * self.jitter_factor.min(1.0);
        let jitter: f64 = rand::rng().random_range(-range..=range);
        Duration::from_secs_f64((delay.as_secs_f64() + jitter).max(0.0))
    }
}

mod defaults {
    pub const fn max_retries() -> u32 {
        3
    }

    pub const fn base_delay_ms() -> u64 {
        500
    }

    pub const fn max_delay_ms() -> u64 {
        30_000
    }

    pub const fn jitter_factor() -> f64 {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.base_delay_ms, 500);
        assert_eq!(policy.max_delay_ms, 30_000);
        assert!(policy.jitter_factor.abs() < f64::EPSILON);
    }

    #[test]
    fn test_should_retry_retryable_kinds() {
        let policy = RetryPolicy::default();

        assert!(policy.should_retry(1, FailureKind::Timeout));
        assert!(policy.should_retry(3, FailureKind::Throttled));
        assert!(!policy.should_retry(4, FailureKind::Timeout));
        assert!(!policy.should_retry(10, FailureKind::ConnectionFailed));
    }

    #[test]
    fn test_terminal_kinds_never_retry() {
        let policy = RetryPolicy::default();

        assert!(!policy.should_retry(1, FailureKind::InvalidRecipient));
        assert!(!policy.should_retry(1, FailureKind::ContentRejected));
        assert!(!policy.should_retry(1, FailureKind::InvalidAttachment));
    }

    #[test]
    fn test_default_backoff_schedule() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_secs(1));
        assert_eq!(policy.backoff(3), Duration::from_secs(2));
    }

    #[test]
    fn test_backoff_is_capped_and_non_decreasing() {
        let policy = RetryPolicy {
            max_delay_ms: 5_000,
            ..RetryPolicy::default()
        };

        let delays: Vec<_> = (1..=80).map(|attempt| policy.base_backoff(attempt)).collect();
        assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(delays.last().copied(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy {
            jitter_factor: 0.2,
            ..RetryPolicy::default()
        };

        for _ in 0..100 {
            let delay = policy.backoff(2);
            assert!(delay >= Duration::from_millis(800), "{delay:?} below range");
            assert!(delay <= Duration::from_millis(1200), "{delay:?} above range");
        }
    }
}
