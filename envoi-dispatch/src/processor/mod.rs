//! Batch scheduling and the worker pool
//!
//! A session is drained one batch at a time. Within a batch a bounded pool
//! of workers sends units concurrently, but only the coordinator in this
//! module mutates the session record, the statistics and the ledger:
//! workers report over a channel and never write shared state themselves.
//!
//! ```text
//! for each batch from the cursor:
//!     observe pause/cancel
//!     validate recipients, skip units the ledger already has
//!     spawn min(max_workers, ready) workers
//!     fold reports: InFlight, FailedRetryable, Succeeded/FailedTerminal
//!     checkpoint (cursor = batch end)
//!     batch pause
//! ```

mod batch;
mod worker;

use std::sync::Arc;

use chrono::Utc;
use envoi_common::{
    FailureKind, SendFailure, SendUnit, SessionState, UnitStatus,
    tracing::{debug, error, info, warn},
};
use envoi_store::{
    Checkpoint, LedgerStore, OutcomeCounts, SessionId, SessionRecord, SessionStore, StoreError,
};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{broadcast, mpsc, watch},
    task::JoinSet,
};

use self::{
    batch::{BatchOutcome, BatchQueue},
    worker::{Report, UnitResult, WorkerContext},
};
use crate::{
    Completion, DispatchConfig, DispatchError, DispatchEvent, FailureRecord, RateLimiter,
    RunControl, StatsAggregator, StatsSnapshot, Transport,
    control::{self, ControlSignal},
};

/// Reports buffered between workers and the coordinator
const REPORT_CAPACITY: usize = 64;

/// Collaborators shared by every session a dispatcher runs
#[derive(Debug)]
pub(crate) struct Engine {
    pub(crate) config: DispatchConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) ledger: Arc<dyn LedgerStore>,
    pub(crate) sessions: Arc<dyn SessionStore>,
    pub(crate) control: RunControl,
    pub(crate) events: broadcast::Sender<DispatchEvent>,
}

/// A unit that ended in a terminal failure, as listed in a [`SessionReport`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFailure {
    pub row_index: usize,
    pub recipient: String,
    pub kind: FailureKind,
    pub attempts: u32,
}

/// Where a session stands once a run returns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub session: SessionId,
    pub state: SessionState,
    pub cursor: usize,
    pub counts: OutcomeCounts,
    pub stats: StatsSnapshot,
    /// Every terminal failure in the session, in plan order
    pub failures: Vec<UnitFailure>,
}

/// Drive a loaded session to completion, cancellation or a halt
pub(crate) async fn run_session(
    engine: &Engine,
    record: SessionRecord,
) -> Result<SessionReport, DispatchError> {
    SessionRun::new(engine, record).execute().await
}

struct SessionRun<'a> {
    engine: &'a Engine,
    record: SessionRecord,
    stats: StatsAggregator,
    worker: Arc<WorkerContext>,
    control: watch::Receiver<ControlSignal>,
}

impl<'a> SessionRun<'a> {
    fn new(engine: &'a Engine, mut record: SessionRecord) -> Self {
        let recovered = record.recover_in_flight();
        if recovered > 0 {
            info!(
                session = %record.id,
                recovered,
                "Re-queued units left in flight by an interrupted run"
            );
        }

        let mut stats = StatsAggregator::new(record.len(), engine.config.stats_window());
        stats.preload(
            record.counts.succeeded,
            record.counts.failed,
            record.counts.not_attempted,
        );

        let worker = Arc::new(WorkerContext {
            transport: Arc::clone(&engine.transport),
            limiter: RateLimiter::new(
                record.settings.pacing,
                engine.config.rate.acquire_timeout(),
            ),
            config: engine.config.clone(),
        });

        Self {
            engine,
            record,
            stats,
            worker,
            control: engine.control.subscribe(),
        }
    }

    #[tracing::instrument(level = "debug", skip(self), fields(session = %self.record.id))]
    async fn execute(mut self) -> Result<SessionReport, DispatchError> {
        info!(
            session = %self.record.id,
            units = self.record.len(),
            cursor = self.record.cursor,
            "Starting session"
        );

        self.persist(self.record.cursor, SessionState::Running)
            .await?;

        while self.record.cursor < self.record.len() {
            if self.between_batches().await == ControlSignal::Cancel {
                return self.cancel().await;
            }

            match self.run_batch().await? {
                BatchOutcome::Completed => {}
                BatchOutcome::Cancelled => return self.cancel().await,
            }

            if self.record.cursor < self.record.len() {
                self.worker.limiter.batch_pause().await;
            }
        }

        if self.record.state != SessionState::Completed {
            self.persist(self.record.cursor, SessionState::Completed)
                .await?;
        }

        let report = self.report();
        info!(
            session = %report.session,
            sent = report.counts.succeeded,
            failed = report.counts.failed,
            "Session completed"
        );
        Ok(report)
    }

    /// Wait out a pause between batches
    async fn between_batches(&mut self) -> ControlSignal {
        let signal = *self.control.borrow_and_update();
        if signal != ControlSignal::Pause {
            return signal;
        }

        self.set_state(SessionState::Paused);
        let signal = control::wait_until_runnable(&mut self.control).await;
        if signal == ControlSignal::Run {
            self.set_state(SessionState::Running);
        }
        signal
    }

    async fn run_batch(&mut self) -> Result<BatchOutcome, DispatchError> {
        let id = self.record.id;
        let range = self.record.batch_range(self.record.cursor);
        let batch = range.start / self.record.settings.batch_size.max(1);

        info!(session = %id, batch, start = range.start, end = range.end, "Starting batch");
        self.emit(DispatchEvent::BatchStarted {
            session: id,
            batch,
            start: range.start,
            end: range.end,
        });

        let mut ready = Vec::with_capacity(range.len());
        for index in range.clone() {
            if self.record.statuses[index] != UnitStatus::Pending {
                continue;
            }

            let unit = self.record.units[index].clone();
            if let Err(e) = unit.recipient().validate() {
                warn!(session = %id, row = unit.row_index(), error = %e, "Invalid recipient");
                let failure = SendFailure::new(FailureKind::InvalidRecipient, e.to_string());
                self.finish_failed(index, 0, failure);
                continue;
            }

            match self
                .engine
                .ledger
                .is_duplicate(unit.recipient(), unit.fingerprint())
                .await
            {
                Ok(true) => {
                    debug!(session = %id, row = unit.row_index(), "Already in the ledger, not sending");
                    self.set_status(index, UnitStatus::Succeeded { attempts: 0 });
                    self.stats.preload(1, 0, 0);
                }
                Ok(false) => ready.push((index, unit)),
                Err(e) => return Err(self.halt(e)),
            }
        }

        let outcome = if ready.is_empty() {
            BatchOutcome::Completed
        } else {
            self.drain(ready).await?
        };

        if matches!(outcome, BatchOutcome::Completed) {
            let state = if range.end == self.record.len() {
                SessionState::Completed
            } else {
                SessionState::Running
            };
            self.persist(range.end, state).await?;

            info!(
                session = %id,
                batch,
                cursor = self.record.cursor,
                sent = self.record.counts.succeeded,
                failed = self.record.counts.failed,
                "Batch completed"
            );
            self.emit(DispatchEvent::BatchCompleted {
                session: id,
                batch,
                cursor: self.record.cursor,
                counts: self.record.counts,
            });
        }

        Ok(outcome)
    }

    /// Run the worker pool over `ready` and fold every report
    async fn drain(
        &mut self,
        ready: Vec<(usize, SendUnit)>,
    ) -> Result<BatchOutcome, DispatchError> {
        let queue = Arc::new(BatchQueue::new(ready));
        let (tx, mut rx) = mpsc::channel(REPORT_CAPACITY);

        let mut workers = JoinSet::new();
        for _ in 0..self.record.settings.max_workers.max(1).min(queue.len()) {
            workers.spawn(worker::run(
                Arc::clone(&self.worker),
                Arc::clone(&queue),
                tx.clone(),
                self.engine.control.subscribe(),
            ));
        }
        drop(tx);

        let mut halted: Option<StoreError> = None;
        let mut control_open = true;
        loop {
            tokio::select! {
                report = rx.recv() => {
                    let Some(report) = report else {
                        break;
                    };
                    if let Err(e) = self.handle(report).await
                        && halted.is_none()
                    {
                        queue.halt();
                        halted = Some(e);
                    }
                }
                changed = self.control.changed(), if control_open => {
                    if changed.is_err() {
                        control_open = false;
                        continue;
                    }
                    let signal = *self.control.borrow_and_update();
                    self.observe(signal);
                }
            }
        }

        let mut panicked = 0;
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(session = %self.record.id, error = %e, "Worker task failed");
                panicked += 1;
            }
        }

        if let Some(source) = halted {
            return Err(self.halt(source));
        }

        if panicked > 0 {
            self.set_state(SessionState::Paused);
            return Err(DispatchError::Internal(format!(
                "{panicked} worker(s) failed in session {}",
                self.record.id
            )));
        }

        if queue.len() > 0 {
            Ok(BatchOutcome::Cancelled)
        } else {
            Ok(BatchOutcome::Completed)
        }
    }

    /// Track pause and resume while workers are running
    fn observe(&mut self, signal: ControlSignal) {
        match signal {
            ControlSignal::Pause => self.set_state(SessionState::Paused),
            ControlSignal::Run => self.set_state(SessionState::Running),
            ControlSignal::Cancel => {
                info!(session = %self.record.id, "Cancel requested, draining in-flight units");
            }
        }
    }

    async fn handle(&mut self, report: Report) -> Result<(), StoreError> {
        match report {
            Report::Started { index, attempt } => {
                debug!(
                    session = %self.record.id,
                    row = self.record.units[index].row_index(),
                    attempt,
                    "Sending"
                );
                self.set_status(index, UnitStatus::InFlight);
            }
            Report::Retrying {
                index,
                attempt,
                failure,
                delay,
            } => {
                let unit = &self.record.units[index];
                warn!(
                    session = %self.record.id,
                    row = unit.row_index(),
                    recipient = unit.recipient().raw(),
                    attempt,
                    kind = %failure.kind,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    detail = %failure.detail,
                    "Attempt failed, retrying"
                );
                self.set_status(
                    index,
                    UnitStatus::FailedRetryable {
                        attempts: attempt,
                        kind: failure.kind,
                    },
                );
                self.stats.record_retry();
            }
            Report::Finished {
                index,
                result: UnitResult::Succeeded { attempts },
            } => {
                let unit = &self.record.units[index];
                let recorded = self
                    .engine
                    .ledger
                    .record_success(unit.recipient(), unit.fingerprint(), Utc::now())
                    .await;

                debug!(
                    session = %self.record.id,
                    row = unit.row_index(),
                    recipient = unit.recipient().raw(),
                    attempts,
                    "Sent"
                );
                self.set_status(index, UnitStatus::Succeeded { attempts });
                self.stats.update(Completion::Succeeded);
                self.emit_progress();

                recorded?;
            }
            Report::Finished {
                index,
                result: UnitResult::Failed { attempts, failure },
            } => {
                let unit = &self.record.units[index];
                warn!(
                    session = %self.record.id,
                    row = unit.row_index(),
                    recipient = unit.recipient().raw(),
                    attempts,
                    kind = %failure.kind,
                    detail = %failure.detail,
                    "Unit failed"
                );
                self.finish_failed(index, attempts, failure);
                self.emit_progress();
            }
        }

        Ok(())
    }

    fn finish_failed(&mut self, index: usize, attempts: u32, failure: SendFailure) {
        self.set_status(
            index,
            UnitStatus::FailedTerminal {
                attempts,
                kind: failure.kind,
            },
        );

        let unit = &self.record.units[index];
        self.stats.update(Completion::Failed(FailureRecord {
            row_index: unit.row_index(),
            recipient: unit.recipient().raw().to_owned(),
            kind: failure.kind,
            detail: failure.detail,
            attempts,
        }));
    }

    fn set_status(&mut self, index: usize, next: UnitStatus) {
        let Some(status) = self.record.statuses.get_mut(index) else {
            return;
        };

        if status.can_transition_to(next) {
            *status = next;
        } else {
            warn!(
                session = %self.record.id,
                index,
                from = ?*status,
                to = ?next,
                "Ignoring invalid status transition"
            );
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.record.state == state {
            return;
        }

        info!(session = %self.record.id, from = %self.record.state, to = %state, "Session state changed");
        self.record.state = state;
        self.emit(DispatchEvent::StateChanged {
            session: self.record.id,
            state,
        });
    }

    /// Durably checkpoint, then apply the same checkpoint in memory
    async fn persist(&mut self, cursor: usize, state: SessionState) -> Result<(), DispatchError> {
        let checkpoint = Checkpoint {
            cursor,
            statuses: self.record.statuses.clone(),
            counts: OutcomeCounts::tally(&self.record.statuses),
            state,
        };

        if let Err(e) = self
            .engine
            .sessions
            .checkpoint(&self.record.id, &checkpoint)
            .await
        {
            return Err(self.halt(e));
        }

        let previous = self.record.state;
        self.record.apply(&checkpoint)?;

        // A pause is never stored: the checkpoint says Running, the run stays paused
        let pausing = *self.control.borrow() == ControlSignal::Pause;
        if pausing && previous == SessionState::Paused && state == SessionState::Running {
            self.record.state = SessionState::Paused;
        } else if previous != state {
            info!(session = %self.record.id, from = %previous, to = %state, "Session state changed");
            self.emit(DispatchEvent::StateChanged {
                session: self.record.id,
                state,
            });
        }
        Ok(())
    }

    /// Mark everything still pending as not attempted and close the session
    async fn cancel(mut self) -> Result<SessionReport, DispatchError> {
        let mut skipped = 0;
        for index in self.record.cursor..self.record.len() {
            if self.record.statuses[index] == UnitStatus::Pending {
                self.set_status(index, UnitStatus::NotAttempted);
                self.stats.update(Completion::NotAttempted);
                skipped += 1;
            }
        }

        info!(session = %self.record.id, skipped, "Session cancelled");
        self.persist(self.record.len(), SessionState::Cancelled)
            .await?;
        Ok(self.report())
    }

    /// Stop in a resumable state after a store failure
    fn halt(&mut self, source: StoreError) -> DispatchError {
        error!(
            session = %self.record.id,
            cursor = self.record.cursor,
            error = %source,
            "Store failure, halting session"
        );

        self.set_state(SessionState::Paused);
        self.emit(DispatchEvent::Halted {
            session: self.record.id,
            reason: source.to_string(),
        });

        DispatchError::Halted {
            session: self.record.id,
            source,
        }
    }

    fn emit(&self, event: DispatchEvent) {
        // No subscribers is fine
        let _ = self.engine.events.send(event);
    }

    fn emit_progress(&self) {
        self.emit(DispatchEvent::Progress {
            session: self.record.id,
            stats: self.stats.snapshot(),
        });
    }

    fn report(&self) -> SessionReport {
        let failures = self
            .record
            .statuses
            .iter()
            .zip(&self.record.units)
            .filter_map(|(status, unit)| match *status {
                UnitStatus::FailedTerminal { attempts, kind } => Some(UnitFailure {
                    row_index: unit.row_index(),
                    recipient: unit.recipient().raw().to_owned(),
                    kind,
                    attempts,
                }),
                _ => None,
            })
            .collect();

        SessionReport {
            session: self.record.id,
            state: self.record.state,
            cursor: self.record.cursor,
            counts: self.record.counts,
            stats: self.stats.snapshot(),
            failures,
        }
    }
}
