//! Dispatch engine for envoi
//!
//! This crate turns a plan of [`SendUnit`](envoi_common::SendUnit)s into paced,
//! retried, deduplicated sends:
//! - [`AntiSpamGate`] caps how many units one session may carry
//! - [`Dispatcher`] filters plans against the ledger and runs sessions batch
//!   by batch with a bounded worker pool
//! - [`RateLimiter`] keeps the aggregate rate under the configured ceiling
//! - [`RetryPolicy`] decides whether and when a failed send is retried
//! - [`StatsAggregator`] feeds progress, throughput and ETA to subscribers

mod config;
mod control;
mod dispatcher;
mod error;
mod events;
pub mod policy;
mod processor;
mod rate_limiter;
mod stats;
mod transport;

pub use config::DispatchConfig;
pub use control::{ControlSignal, RunControl};
pub use dispatcher::{DispatchReport, Dispatcher, PlannedSession};
pub use error::{DispatchError, PolicyError};
pub use events::{DispatchEvent, EVENT_CAPACITY};
pub use policy::{AntiSpamGate, GateConfig, GateDecision, GateVerdict, GatedPlan, RetryPolicy};
pub use processor::{SessionReport, UnitFailure};
pub use rate_limiter::{AcquireTimeout, RateLimitConfig, RateLimiter};
pub use stats::{
    Completion, FailureRecord, RECENT_FAILURES, StatsAggregator, StatsSnapshot, TOP_ERROR_KINDS,
};
pub use transport::Transport;
