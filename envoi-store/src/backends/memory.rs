use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use envoi_common::{ContentFingerprint, Recipient, SendUnit, SessionSettings};

use crate::{
    Result, SessionId, StoreError,
    ledger::{LedgerBook, LedgerEntry, LedgerSnapshot, LedgerStats, LedgerStore, ResetConfirmation},
    session::{Checkpoint, SessionRecord, SessionStore, SessionSummary, newest_first},
};

/// In-memory ledger
///
/// Forgets everything when dropped. Clones share the same book.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    book: Arc<RwLock<LedgerBook>>,
}

impl MemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing book, e.g. one decoded from an export
    #[must_use]
    pub fn with_book(book: LedgerBook) -> Self {
        Self {
            book: Arc::new(RwLock::new(book)),
        }
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn is_duplicate(
        &self,
        recipient: &Recipient,
        fingerprint: &ContentFingerprint,
    ) -> Result<bool> {
        Ok(self.book.read()?.contains(recipient, fingerprint))
    }

    async fn record_success(
        &self,
        recipient: &Recipient,
        fingerprint: &ContentFingerprint,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self.book.write()?.record(recipient, fingerprint, at))
    }

    async fn stats(&self) -> Result<LedgerStats> {
        Ok(self.book.read()?.stats())
    }

    async fn history(&self, recipient: &Recipient) -> Result<Option<LedgerEntry>> {
        Ok(self.book.read()?.history(recipient))
    }

    async fn export(&self) -> Result<LedgerSnapshot> {
        Ok(self.book.read()?.snapshot())
    }

    async fn reset(&self, _confirmation: ResetConfirmation) -> Result<()> {
        *self.book.write()? = LedgerBook::default();
        Ok(())
    }
}

/// In-memory session store
///
/// Clones share the same sessions.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    pub(crate) sessions: Arc<DashMap<SessionId, SessionRecord>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, units: Vec<SendUnit>, settings: SessionSettings) -> Result<SessionId> {
        let id = SessionId::generate();
        if self.sessions.contains_key(&id) {
            return Err(StoreError::AlreadyExists(id));
        }

        self.sessions
            .insert(id, SessionRecord::new(id, units, settings));
        Ok(id)
    }

    async fn checkpoint(&self, id: &SessionId, checkpoint: &Checkpoint) -> Result<()> {
        let mut record = self
            .sessions
            .get_mut(id)
            .ok_or(StoreError::NotFound(*id))?;
        record.apply(checkpoint)
    }

    async fn load(&self, id: &SessionId) -> Result<SessionRecord> {
        self.sessions
            .get(id)
            .map(|record| record.value().clone())
            .ok_or(StoreError::NotFound(*id))
    }

    async fn list(&self) -> Result<Vec<SessionSummary>> {
        let mut summaries: Vec<_> = self
            .sessions
            .iter()
            .map(|record| record.summary())
            .collect();
        newest_first(&mut summaries);
        Ok(summaries)
    }

    async fn delete(&self, id: &SessionId) -> Result<()> {
        self.sessions
            .remove(id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(*id))
    }
}
