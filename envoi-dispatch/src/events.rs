use envoi_common::SessionState;
use envoi_store::{OutcomeCounts, SessionId};

use crate::StatsSnapshot;

/// Default capacity of the event channel; slow subscribers skip ahead
pub const EVENT_CAPACITY: usize = 1024;

/// Read-only notifications for the presentation layer
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    StateChanged {
        session: SessionId,
        state: SessionState,
    },
    BatchStarted {
        session: SessionId,
        batch: usize,
        start: usize,
        end: usize,
    },
    BatchCompleted {
        session: SessionId,
        batch: usize,
        cursor: usize,
        counts: OutcomeCounts,
    },
    Progress {
        session: SessionId,
        stats: StatsSnapshot,
    },
    /// A store failure stopped the session; it can be resumed later
    Halted {
        session: SessionId,
        reason: String,
    },
}

impl DispatchEvent {
    #[must_use]
    pub const fn session(&self) -> SessionId {
        match self {
            Self::StateChanged { session, .. }
            | Self::BatchStarted { session, .. }
            | Self::BatchCompleted { session, .. }
            | Self::Progress { session, .. }
            | Self::Halted { session, .. } => *session,
        }
    }
}
