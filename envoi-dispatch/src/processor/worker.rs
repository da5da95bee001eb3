use std::{sync::Arc, time::Duration};

use envoi_common::{
    FailureKind, SendFailure, SendOutcome, SendUnit,
    tracing::{debug, warn},
};
use tokio::sync::{mpsc, watch};

use super::batch::BatchQueue;
use crate::{
    DispatchConfig, RateLimiter, Transport,
    control::{self, ControlSignal},
};

/// What a worker tells the coordinator; the coordinator is the only writer
/// of session state.
#[derive(Debug)]
pub(crate) enum Report {
    Started {
        index: usize,
        attempt: u32,
    },
    Retrying {
        index: usize,
        attempt: u32,
        failure: SendFailure,
        delay: Duration,
    },
    Finished {
        index: usize,
        result: UnitResult,
    },
}

#[derive(Debug)]
pub(crate) enum UnitResult {
    Succeeded { attempts: u32 },
    Failed { attempts: u32, failure: SendFailure },
}

/// Everything a worker needs, shared by the whole pool
#[derive(Debug)]
pub(crate) struct WorkerContext {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) limiter: RateLimiter,
    pub(crate) config: DispatchConfig,
}

impl WorkerContext {
    /// One paced, time-limited attempt. Only the send itself is timed; the
    /// wait for a pacing slot is not part of the attempt.
    async fn attempt(&self, unit: &SendUnit) -> SendOutcome {
        self.limiter.wait_for_slot().await;

        let timeout = self.config.send_timeout(unit);
        tokio::time::timeout(timeout, self.transport.send(unit))
            .await
            .unwrap_or_else(|_| {
                SendOutcome::retryable(
                    FailureKind::Timeout,
                    format!("no response within {}s", timeout.as_secs()),
                )
            })
    }

    /// Drive one unit to a final result, retries included
    async fn process(
        &self,
        index: usize,
        unit: &SendUnit,
        reports: &mpsc::Sender<Report>,
    ) -> Option<UnitResult> {
        let mut attempt = 0;

        loop {
            attempt += 1;
            reports.send(Report::Started { index, attempt }).await.ok()?;

            let failure = match self.attempt(unit).await {
                SendOutcome::Success => {
                    return Some(UnitResult::Succeeded { attempts: attempt });
                }
                SendOutcome::Terminal(failure) => {
                    return Some(UnitResult::Failed {
                        attempts: attempt,
                        failure,
                    });
                }
                SendOutcome::Retryable(failure) => failure,
            };

            if !self.config.retry.should_retry(attempt, failure.kind) {
                return Some(UnitResult::Failed {
                    attempts: attempt,
                    failure,
                });
            }

            let delay = self.config.retry.backoff(attempt);
            debug!(
                row = unit.row_index(),
                attempt,
                kind = %failure.kind,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Retrying after backoff"
            );
            reports
                .send(Report::Retrying {
                    index,
                    attempt,
                    failure,
                    delay,
                })
                .await
                .ok()?;

            tokio::time::sleep(delay).await;
        }
    }
}

/// Draw units until the batch is empty, halted or cancelled.
///
/// Pause and cancel are only looked at between units.
pub(crate) async fn run(
    context: Arc<WorkerContext>,
    queue: Arc<BatchQueue>,
    reports: mpsc::Sender<Report>,
    mut control: watch::Receiver<ControlSignal>,
) {
    loop {
        if control::wait_until_runnable(&mut control).await == ControlSignal::Cancel {
            break;
        }

        let Some((index, unit)) = queue.next() else {
            break;
        };

        let Some(result) = context.process(index, &unit, &reports).await else {
            warn!(row = unit.row_index(), "Coordinator went away, abandoning unit");
            break;
        };

        if reports.send(Report::Finished { index, result }).await.is_err() {
            break;
        }
    }
}
