//! Typed error handling for dispatch operations.
//!
//! Per-unit send failures are not errors: they are folded into unit status
//! and statistics. Only policy violations, configuration problems and store
//! failures surface here.

use envoi_common::SessionState;
use envoi_store::{SessionId, StoreError};
use thiserror::Error;

/// Top-level dispatch error type.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The plan was rejected before anything was dispatched.
    #[error("Policy violation: {0}")]
    Policy(#[from] PolicyError),

    /// A store operation failed outside of a running session.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A store operation failed while a session was running.
    ///
    /// The session stopped in a recoverable state and can be resumed from
    /// its last durable checkpoint.
    #[error("Session {session} halted: {source}")]
    Halted {
        session: SessionId,
        #[source]
        source: StoreError,
    },

    /// The session is already final or has no work left.
    #[error("Session {session} cannot be resumed from state {state}")]
    NotResumable {
        session: SessionId,
        state: SessionState,
    },

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Anti-spam policy violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("Plan of {size} units exceeds the limit of {limit}; truncate or split it")]
    ExceedsLimit { size: usize, limit: usize },
}

impl DispatchError {
    /// Returns `true` if the plan was refused by policy
    #[must_use]
    pub const fn is_policy(&self) -> bool {
        matches!(self, Self::Policy(_))
    }

    /// Returns `true` if the underlying cause is a store failure
    #[must_use]
    pub const fn is_resource(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Halted { .. })
    }

    /// Returns `true` if a running session was halted
    #[must_use]
    pub const fn is_halt(&self) -> bool {
        matches!(self, Self::Halted { .. })
    }
}
