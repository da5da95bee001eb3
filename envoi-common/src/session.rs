//! Session-level settings and lifecycle state.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lifecycle of one dispatch run.
///
/// `Created -> Running <-> Paused -> {Completed | Cancelled}`. A record
/// loaded from storage whose state is not final and whose cursor has not
/// reached the end of the plan was interrupted and can be resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Created,
    Running,
    Paused,
    Completed,
    Cancelled,
}

impl SessionState {
    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Send pacing persisted with a session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pacing {
    /// Aggregate ceiling across all workers
    pub messages_per_second: f64,
    /// Extra pause inserted at every batch boundary
    pub batch_pause: Duration,
}

/// Scheduling parameters fixed at session creation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    pub batch_size: usize,
    pub max_workers: usize,
    pub pacing: Pacing,
}

impl SessionSettings {
    /// Number of batches a plan of `plan_len` units is partitioned into
    #[must_use]
    pub const fn batch_count(&self, plan_len: usize) -> usize {
        if self.batch_size == 0 {
            return 0;
        }
        plan_len.div_ceil(self.batch_size)
    }
}
