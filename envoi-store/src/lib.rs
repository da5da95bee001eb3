//! Durable state for the envoi bulk dispatcher.
//!
//! Two stores live here. The [`LedgerStore`] remembers every
//! `(recipient, fingerprint)` pair that was confirmed sent, across runs.
//! The [`SessionStore`] keeps one resumable [`SessionRecord`] per dispatch
//! run, checkpointed at batch boundaries.

pub mod backends;
pub mod config;
pub mod error;
pub mod ledger;
pub mod session;
pub mod types;

pub use backends::{
    FileLedger, FileSessionStore, FileStore, FileStoreBuilder, MemoryLedger, MemorySessionStore,
    TestSessionStore,
};
pub use config::{StoreConfig, Stores};
pub use error::{Result, SerializationError, StoreError, ValidationError};
pub use ledger::{
    LedgerBook, LedgerEntry, LedgerRow, LedgerSnapshot, LedgerStats, LedgerStore,
    ResetConfirmation,
};
pub use session::{Checkpoint, OutcomeCounts, SessionRecord, SessionStore, SessionSummary};
pub use types::SessionId;
