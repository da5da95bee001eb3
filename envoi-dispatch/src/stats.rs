//! Running statistics for a session.

use std::{collections::VecDeque, time::Duration};

use ahash::AHashMap;
use envoi_common::FailureKind;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Number of error kinds reported in a snapshot
pub const TOP_ERROR_KINDS: usize = 5;

/// Number of recent terminal failures kept with their details
pub const RECENT_FAILURES: usize = 100;

/// A unit that ended in a terminal failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub row_index: usize,
    pub recipient: String,
    pub kind: FailureKind,
    pub detail: String,
    pub attempts: u32,
}

/// The final outcome of one unit, as folded into statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Succeeded,
    Failed(FailureRecord),
    NotAttempted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub not_attempted: usize,
    pub remaining: usize,
    pub retries: usize,
    pub elapsed: Duration,
    /// Completions per second over the sliding window
    pub throughput_per_second: f64,
    pub estimated_time_remaining: Option<Duration>,
    /// Percentage of finished units that succeeded
    pub success_rate: f64,
    pub progress_percentage: f64,
    /// Most frequent terminal failure kinds, highest count first
    pub top_error_kinds: Vec<(FailureKind, usize)>,
    pub recent_failures: Vec<FailureRecord>,
}

/// Aggregates unit completions into counts, throughput and an error
/// histogram.
///
/// Throughput only looks at completions inside the sliding window, so the
/// ETA follows the current pace rather than the lifetime average.
#[derive(Debug)]
pub struct StatsAggregator {
    total: usize,
    sent: usize,
    failed: usize,
    not_attempted: usize,
    retries: usize,
    started_at: Instant,
    window: Duration,
    completions: VecDeque<Instant>,
    errors: AHashMap<FailureKind, usize>,
    recent_failures: VecDeque<FailureRecord>,
}

#[allow(
    clippy::cast_precision_loss,
    reason = "Counts are far below the range where f64 loses precision"
)]
fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

impl StatsAggregator {
    #[must_use]
    pub fn new(total: usize, window: Duration) -> Self {
        Self {
            total,
            sent: 0,
            failed: 0,
            not_attempted: 0,
            retries: 0,
            started_at: Instant::now(),
            window,
            completions: VecDeque::new(),
            errors: AHashMap::default(),
            recent_failures: VecDeque::new(),
        }
    }

    /// Count units that finished before this run without affecting throughput
    pub fn preload(&mut self, sent: usize, failed: usize, not_attempted: usize) {
        self.sent += sent;
        self.failed += failed;
        self.not_attempted += not_attempted;
    }

    pub fn record_retry(&mut self) {
        self.retries += 1;
    }

    pub fn update(&mut self, completion: Completion) {
        self.update_at(completion, Instant::now());
    }

    pub fn update_at(&mut self, completion: Completion, now: Instant) {
        match completion {
            Completion::Succeeded => {
                self.sent += 1;
                self.completions.push_back(now);
            }
            Completion::Failed(failure) => {
                self.failed += 1;
                self.completions.push_back(now);
                *self.errors.entry(failure.kind).or_default() += 1;

                if self.recent_failures.len() == RECENT_FAILURES {
                    self.recent_failures.pop_front();
                }
                self.recent_failures.push_back(failure);
            }
            Completion::NotAttempted => self.not_attempted += 1,
        }

        self.prune(now);
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.completions.front() {
            if now.duration_since(*oldest) > self.window {
                self.completions.pop_front();
            } else {
                break;
            }
        }
    }

    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.total
            .saturating_sub(self.sent + self.failed + self.not_attempted)
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        self.snapshot_at(Instant::now())
    }

    #[must_use]
    pub fn snapshot_at(&self, now: Instant) -> StatsSnapshot {
        let elapsed = now.duration_since(self.started_at);
        let span = elapsed.min(self.window);
        let in_window = self
            .completions
            .iter()
            .filter(|at| now.duration_since(**at) <= self.window)
            .count();

        let throughput_per_second = if span.is_zero() {
            0.0
        } else {
            ratio(in_window, 1) / span.as_secs_f64()
        };

        let remaining = self.remaining();
        let estimated_time_remaining = if remaining == 0 {
            Some(Duration::ZERO)
        } else if throughput_per_second > 0.0 {
            Some(Duration::from_secs_f64(
                ratio(remaining, 1) / throughput_per_second,
            ))
        } else {
            None
        };

        let mut top_error_kinds: Vec<_> = self.errors.iter().map(|(k, n)| (*k, *n)).collect();
        top_error_kinds.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        top_error_kinds.truncate(TOP_ERROR_KINDS);

        StatsSnapshot {
            total: self.total,
            sent: self.sent,
            failed: self.failed,
            not_attempted: self.not_attempted,
            remaining,
            retries: self.retries,
            elapsed,
            throughput_per_second,
            estimated_time_remaining,
            success_rate: ratio(self.sent, self.sent + self.failed) * 100.0,
            progress_percentage: ratio(self.total - remaining, self.total) * 100.0,
            top_error_kinds,
            recent_failures: self.recent_failures.iter().cloned().collect(),
        }
    }
}
