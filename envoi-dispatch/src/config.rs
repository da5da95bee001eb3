use std::time::Duration;

use envoi_common::{FingerprintStrategy, SendUnit, SessionSettings};
use serde::{Deserialize, Serialize};

use crate::{DispatchError, GateConfig, RateLimitConfig, RetryPolicy};

const fn default_batch_size() -> usize {
    50
}

const fn default_max_workers() -> usize {
    3
}

const fn default_send_timeout_secs() -> u64 {
    30
}

const fn default_attachment_send_timeout_secs() -> u64 {
    90
}

const fn default_stats_window_secs() -> u64 {
    60
}

/// Dispatcher configuration
///
/// ```ron
/// dispatch: (
///     batch_size: 50,
///     max_workers: 3,
///     rate: (messages_per_second: 1.0, batch_pause_ms: 2000),
///     retry: (max_retries: 3, base_delay_ms: 500),
///     gate: (warn_threshold: 1000, max_units: 2500),
/// )
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Units per batch; batches are the unit of checkpointing
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Concurrent senders within a batch
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    #[serde(default)]
    pub rate: RateLimitConfig,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub gate: GateConfig,

    /// Timeout for one text-only send attempt (in seconds)
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,

    /// Timeout for one send attempt that carries an attachment (in seconds)
    #[serde(default = "default_attachment_send_timeout_secs")]
    pub attachment_send_timeout_secs: u64,

    /// How attachments contribute to the deduplication fingerprint
    #[serde(default)]
    pub fingerprint: FingerprintStrategy,

    /// Sliding window used for throughput and ETA (in seconds)
    #[serde(default = "default_stats_window_secs")]
    pub stats_window_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_workers: default_max_workers(),
            rate: RateLimitConfig::default(),
            retry: RetryPolicy::default(),
            gate: GateConfig::default(),
            send_timeout_secs: default_send_timeout_secs(),
            attachment_send_timeout_secs: default_attachment_send_timeout_secs(),
            fingerprint: FingerprintStrategy::default(),
            stats_window_secs: default_stats_window_secs(),
        }
    }
}

impl DispatchConfig {
    /// Check the configuration for values the scheduler cannot run with
    ///
    /// # Errors
    /// [`DispatchError::Configuration`] naming the first offending field
    pub fn validate(&self) -> Result<(), DispatchError> {
        let fail = |message: &str| Err(DispatchError::Configuration(message.to_owned()));

        if self.batch_size == 0 {
            return fail("batch_size must be at least 1");
        }
        if self.max_workers == 0 {
            return fail("max_workers must be at least 1");
        }
        if !self.rate.messages_per_second.is_finite() || self.rate.messages_per_second <= 0.0 {
            return fail("rate.messages_per_second must be a positive number");
        }
        if self.worst_case_backlog() > self.rate.acquire_timeout() {
            return fail(
                "max_workers / rate.messages_per_second cannot exceed rate.acquire_timeout_secs",
            );
        }
        if self.gate.max_units == 0 {
            return fail("gate.max_units must be at least 1");
        }
        if self.gate.warn_threshold > self.gate.max_units {
            return fail("gate.warn_threshold cannot be above gate.max_units");
        }
        if self.send_timeout_secs == 0 || self.attachment_send_timeout_secs == 0 {
            return fail("send timeouts must be at least 1 second");
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return fail("retry.jitter_factor must be between 0.0 and 1.0");
        }
        if self.stats_window_secs == 0 {
            return fail("stats_window_secs must be at least 1");
        }

        Ok(())
    }

    /// How far ahead the last of `max_workers` queued workers has its
    /// slot reserved
    #[must_use]
    pub fn worst_case_backlog(&self) -> Duration {
        let workers = u32::try_from(self.max_workers).unwrap_or(u32::MAX);
        Duration::try_from_secs_f64(self.rate.messages_per_second.recip())
            .map_or(Duration::MAX, |spacing| spacing.saturating_mul(workers))
    }

    /// Scheduling parameters stored with each new session
    #[must_use]
    pub const fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            batch_size: self.batch_size,
            max_workers: self.max_workers,
            pacing: self.rate.pacing(),
        }
    }

    /// The timeout for one attempt at `unit`
    #[must_use]
    pub const fn send_timeout(&self, unit: &SendUnit) -> Duration {
        if unit.attachment().is_some() {
            Duration::from_secs(self.attachment_send_timeout_secs)
        } else {
            Duration::from_secs(self.send_timeout_secs)
        }
    }

    #[must_use]
    pub const fn stats_window(&self) -> Duration {
        Duration::from_secs(self.stats_window_secs)
    }
}
