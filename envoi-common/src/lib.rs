//! Shared domain types for the envoi bulk dispatcher.
//!
//! Everything that crosses a crate boundary lives here: the immutable
//! [`SendUnit`] and its deduplication identity, per-unit status, the
//! failure taxonomy reported by transports, and the session settings that
//! get persisted alongside a plan.

pub mod error;
pub mod fingerprint;
pub mod logging;
pub mod outcome;
pub mod recipient;
pub mod session;
pub mod unit;

pub use error::RecipientError;
pub use fingerprint::{ContentFingerprint, FingerprintStrategy};
pub use outcome::{FailureKind, SendFailure, SendOutcome};
pub use recipient::Recipient;
pub use session::{Pacing, SessionSettings, SessionState};
pub use tracing;
pub use unit::{Attachment, SendUnit, SendUnitBuilder, UnitStatus};
