//! Policies consulted before and during dispatch.
//!
//! - [`AntiSpamGate`]: caps how many units one session may dispatch
//! - [`RetryPolicy`]: decides whether and when a failed unit is retried

pub mod gate;
pub mod retry;

pub use gate::{AntiSpamGate, GateConfig, GateDecision, GateVerdict, GatedPlan};
pub use retry::RetryPolicy;
