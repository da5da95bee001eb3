//! Durable, resumable records of dispatch sessions.

use std::ops::Range;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use envoi_common::{SendUnit, SessionSettings, SessionState, UnitStatus};
use serde::{Deserialize, Serialize};

use crate::{Result, SessionId, StoreError};

/// Units per status bucket in a session.
///
/// `pending` covers every unit that has not reached a final status,
/// including units that were in flight or backing off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub pending: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub not_attempted: usize,
}

impl OutcomeCounts {
    #[must_use]
    pub fn tally(statuses: &[UnitStatus]) -> Self {
        statuses.iter().fold(Self::default(), |mut counts, status| {
            match status {
                UnitStatus::Succeeded { .. } => counts.succeeded += 1,
                UnitStatus::FailedTerminal { .. } => counts.failed += 1,
                UnitStatus::NotAttempted => counts.not_attempted += 1,
                UnitStatus::Pending | UnitStatus::InFlight | UnitStatus::FailedRetryable { .. } => {
                    counts.pending += 1;
                }
            }
            counts
        })
    }

    #[must_use]
    pub const fn total(&self) -> usize {
        self.pending + self.succeeded + self.failed + self.not_attempted
    }
}

/// Progress written at a batch boundary, applied to a record as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub cursor: usize,
    pub statuses: Vec<UnitStatus>,
    pub counts: OutcomeCounts,
    pub state: SessionState,
}

/// Everything persisted about one dispatch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub settings: SessionSettings,
    pub units: Vec<SendUnit>,
    pub statuses: Vec<UnitStatus>,
    /// Index of the first unit of the next batch to schedule
    pub cursor: usize,
    pub counts: OutcomeCounts,
    pub state: SessionState,
}

impl SessionRecord {
    #[must_use]
    pub fn new(id: SessionId, units: Vec<SendUnit>, settings: SessionSettings) -> Self {
        let now = Utc::now();
        let statuses = vec![UnitStatus::Pending; units.len()];
        let counts = OutcomeCounts::tally(&statuses);

        Self {
            id,
            created_at: now,
            updated_at: now,
            settings,
            units,
            statuses,
            cursor: 0,
            counts,
            state: SessionState::Created,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// A session that stopped before reaching a final state with work left.
    #[must_use]
    pub fn is_resumable(&self) -> bool {
        !self.state.is_final() && self.cursor < self.len()
    }

    /// The unit range of the batch starting at `cursor`
    #[must_use]
    pub fn batch_range(&self, cursor: usize) -> Range<usize> {
        let end = cursor.saturating_add(self.settings.batch_size.max(1)).min(self.len());
        cursor.min(end)..end
    }

    /// Validate and apply a checkpoint.
    ///
    /// # Errors
    /// [`StoreError::InvalidCheckpoint`] if the cursor moves backwards or
    /// past the end of the plan, or the status array has the wrong length.
    /// The record is unchanged on error.
    pub fn apply(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        if checkpoint.cursor < self.cursor {
            return Err(StoreError::InvalidCheckpoint(format!(
                "cursor moved backwards from {} to {}",
                self.cursor, checkpoint.cursor
            )));
        }

        if checkpoint.cursor > self.len() {
            return Err(StoreError::InvalidCheckpoint(format!(
                "cursor {} is past the end of a {} unit plan",
                checkpoint.cursor,
                self.len()
            )));
        }

        if checkpoint.statuses.len() != self.len() {
            return Err(StoreError::InvalidCheckpoint(format!(
                "expected {} statuses, got {}",
                self.len(),
                checkpoint.statuses.len()
            )));
        }

        self.cursor = checkpoint.cursor;
        self.statuses.clone_from(&checkpoint.statuses);
        self.counts = checkpoint.counts;
        self.state = checkpoint.state;
        self.updated_at = Utc::now();

        Ok(())
    }

    /// Reset units left mid-attempt at or beyond the cursor back to `Pending`.
    ///
    /// Returns the number of units reset. This is the only backwards status
    /// move and is only valid while recovering an interrupted session.
    pub fn recover_in_flight(&mut self) -> usize {
        let mut reset = 0;
        for status in self.statuses.iter_mut().skip(self.cursor) {
            if matches!(status, UnitStatus::InFlight | UnitStatus::FailedRetryable { .. }) {
                *status = UnitStatus::Pending;
                reset += 1;
            }
        }

        if reset > 0 {
            self.counts = OutcomeCounts::tally(&self.statuses);
        }
        reset
    }

    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            state: self.state,
            created_at: self.created_at,
            updated_at: self.updated_at,
            total: self.len(),
            cursor: self.cursor,
            counts: self.counts,
        }
    }
}

/// Listing metadata for a session, without its unit list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub total: usize,
    pub cursor: usize,
    pub counts: OutcomeCounts,
}

impl SessionSummary {
    #[must_use]
    pub fn is_resumable(&self) -> bool {
        !self.state.is_final() && self.cursor < self.total
    }

    /// Time since the session was created
    #[must_use]
    pub fn age(&self) -> TimeDelta {
        self.age_at(Utc::now())
    }

    #[must_use]
    pub fn age_at(&self, now: DateTime<Utc>) -> TimeDelta {
        now.signed_duration_since(self.created_at)
    }
}

/// Sort summaries newest first
pub(crate) fn newest_first(summaries: &mut [SessionSummary]) {
    summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
}

/// Durable storage for session records.
///
/// The store never prunes on its own; it exposes creation times through
/// [`SessionSummary::age`] for an external maintenance task.
#[async_trait]
pub trait SessionStore: Send + Sync + std::fmt::Debug {
    /// Persist a new session in the `Created` state
    async fn create(&self, units: Vec<SendUnit>, settings: SessionSettings) -> Result<SessionId>;

    /// Atomically apply a checkpoint to a stored session
    async fn checkpoint(&self, id: &SessionId, checkpoint: &Checkpoint) -> Result<()>;

    async fn load(&self, id: &SessionId) -> Result<SessionRecord>;

    /// Summaries of every stored session, newest first
    async fn list(&self) -> Result<Vec<SessionSummary>>;

    async fn delete(&self, id: &SessionId) -> Result<()>;

    /// Sessions with work left that did not reach a final state
    async fn list_resumable(&self) -> Result<Vec<SessionSummary>> {
        let mut sessions = self.list().await?;
        sessions.retain(SessionSummary::is_resumable);
        Ok(sessions)
    }
}
