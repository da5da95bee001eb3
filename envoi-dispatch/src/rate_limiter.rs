//! Session-wide send pacing
//!
//! Every send reserves a slot on a single timeline shared by all workers.
//! Consecutive slots are at least `1 / messages_per_second` apart, so the
//! aggregate rate across the whole pool never exceeds the ceiling no matter
//! how many workers are drawing.
//!
//! ```text
//! messages_per_second = 2, batch_pause = 2s
//!
//! t=0.0  send       (worker 1)
//! t=0.5  send       (worker 2)
//! t=1.0  send       (worker 3)
//!        -- batch boundary --
//! t=3.5  send       (pause ends, spacing resumes)
//! ```

use std::time::Duration;

use envoi_common::{Pacing, tracing};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

/// Configuration for send pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Aggregate ceiling across all workers
    #[serde(default = "default_messages_per_second")]
    pub messages_per_second: f64,

    /// Extra pause inserted at every batch boundary (in milliseconds)
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,

    /// Longest a worker may wait for its slot (in seconds)
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            messages_per_second: default_messages_per_second(),
            batch_pause_ms: default_batch_pause_ms(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
        }
    }
}

const fn default_messages_per_second() -> f64 {
    1.0
}

const fn default_batch_pause_ms() -> u64 {
    2000
}

const fn default_acquire_timeout_secs() -> u64 {
    60
}

impl RateLimitConfig {
    #[must_use]
    pub const fn pacing(&self) -> Pacing {
        Pacing {
            messages_per_second: self.messages_per_second,
            batch_pause: Duration::from_millis(self.batch_pause_ms),
        }
    }

    #[must_use]
    pub const fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

/// The next slot is further away than the acquire timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("rate limiter slot is {wait:?} away, longer than the {timeout:?} acquire timeout")]
pub struct AcquireTimeout {
    pub wait: Duration,
    pub timeout: Duration,
}

/// Shared pacing state for one session
#[derive(Debug)]
pub struct RateLimiter {
    spacing: Duration,
    batch_pause: Duration,
    acquire_timeout: Duration,
    /// Earliest instant the next send may start
    next_free: parking_lot::Mutex<Option<Instant>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(pacing: Pacing, acquire_timeout: Duration) -> Self {
        let spacing = if pacing.messages_per_second.is_finite() && pacing.messages_per_second > 0.0
        {
            Duration::from_secs_f64(1.0 / pacing.messages_per_second)
        } else {
            Duration::ZERO
        };

        Self {
            spacing,
            batch_pause: pacing.batch_pause,
            acquire_timeout,
            next_free: parking_lot::Mutex::new(None),
        }
    }

    /// Minimum time between two sends
    #[must_use]
    pub const fn spacing(&self) -> Duration {
        self.spacing
    }

    /// Reserve the next send slot and wait for it.
    ///
    /// # Errors
    /// [`AcquireTimeout`] if the slot is further away than the acquire
    /// timeout. No slot is reserved in that case.
    pub async fn acquire(&self) -> Result<(), AcquireTimeout> {
        let now = Instant::now();
        let slot = {
            let mut next_free = self.next_free.lock();
            let slot = next_free.map_or(now, |next| next.max(now));

            let wait = slot.duration_since(now);
            if wait > self.acquire_timeout {
                return Err(AcquireTimeout {
                    wait,
                    timeout: self.acquire_timeout,
                });
            }

            *next_free = Some(slot + self.spacing);
            slot
        };

        if slot > now {
            tracing::trace!(
                wait_secs = slot.duration_since(now).as_secs_f64(),
                "Waiting for send slot"
            );
            tokio::time::sleep_until(slot).await;
        }

        Ok(())
    }

    /// Wait for a send slot however far away it is.
    ///
    /// A slot beyond the acquire timeout is not an error here: the wait is
    /// logged and the reservation retried once the backlog is back under
    /// the timeout.
    pub async fn wait_for_slot(&self) {
        while let Err(e) = self.acquire().await {
            tracing::warn!(
                wait_secs = e.wait.as_secs_f64(),
                timeout_secs = e.timeout.as_secs_f64(),
                "Send slot backlogged past the acquire timeout, waiting"
            );
            tokio::time::sleep(e.wait.saturating_sub(e.timeout)).await;
        }
    }

    /// Wait out the batch boundary pause. No slot is handed out before it ends.
    pub async fn batch_pause(&self) {
        let until = {
            let mut next_free = self.next_free.lock();
            let until = Instant::now() + self.batch_pause;
            *next_free = Some(next_free.map_or(until, |next| next.max(until)));
            until
        };

        tracing::debug!(
            pause_secs = self.batch_pause.as_secs_f64(),
            "Pausing at batch boundary"
        );
        tokio::time::sleep_until(until).await;
    }
}
