//! The persistent record of every (recipient, content) pair already sent.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use envoi_common::{ContentFingerprint, Recipient};
use serde::{Deserialize, Serialize};

use crate::{Result, StoreError};

/// Per-recipient delivery history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub fingerprints: BTreeSet<ContentFingerprint>,
    pub last_sent: DateTime<Utc>,
    pub total_sent: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStats {
    pub total_recipients: usize,
    pub total_messages: u64,
}

/// A point-in-time export of the whole ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub exported_at: DateTime<Utc>,
    pub last_updated: Option<DateTime<Utc>>,
    pub stats: LedgerStats,
    pub recipients: Vec<LedgerRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRow {
    pub recipient: String,
    pub entry: LedgerEntry,
}

/// The ledger's contents, keyed by normalized recipient.
///
/// Backends hold one of these and persist it; all the bookkeeping lives
/// here so file and memory ledgers agree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerBook {
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recipients: BTreeMap<String, LedgerEntry>,
}

impl LedgerBook {
    #[must_use]
    pub fn contains(&self, recipient: &Recipient, fingerprint: &ContentFingerprint) -> bool {
        self.recipients
            .get(recipient.normalized())
            .is_some_and(|entry| entry.fingerprints.contains(fingerprint))
    }

    /// Record a confirmed send. Returns `false` if the pair was already known,
    /// in which case nothing changes.
    pub fn record(
        &mut self,
        recipient: &Recipient,
        fingerprint: &ContentFingerprint,
        at: DateTime<Utc>,
    ) -> bool {
        let entry = self
            .recipients
            .entry(recipient.normalized().to_owned())
            .or_insert_with(|| LedgerEntry {
                fingerprints: BTreeSet::new(),
                last_sent: at,
                total_sent: 0,
            });

        if !entry.fingerprints.insert(fingerprint.clone()) {
            return false;
        }

        entry.total_sent = entry.total_sent.saturating_add(1);
        entry.last_sent = entry.last_sent.max(at);
        self.last_updated = Some(self.last_updated.map_or(at, |last| last.max(at)));
        true
    }

    /// Undo [`Self::record`] for a pair that was just inserted
    pub(crate) fn rollback(
        &mut self,
        recipient: &Recipient,
        previous: Option<LedgerEntry>,
        last_updated: Option<DateTime<Utc>>,
    ) {
        match previous {
            Some(entry) => {
                self.recipients.insert(recipient.normalized().to_owned(), entry);
            }
            None => {
                self.recipients.remove(recipient.normalized());
            }
        }
        self.last_updated = last_updated;
    }

    #[must_use]
    pub fn stats(&self) -> LedgerStats {
        LedgerStats {
            total_recipients: self.recipients.len(),
            total_messages: self.recipients.values().map(|entry| entry.total_sent).sum(),
        }
    }

    #[must_use]
    pub fn history(&self, recipient: &Recipient) -> Option<LedgerEntry> {
        self.recipients.get(recipient.normalized()).cloned()
    }

    #[must_use]
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            exported_at: Utc::now(),
            last_updated: self.last_updated,
            stats: self.stats(),
            recipients: self
                .recipients
                .iter()
                .map(|(recipient, entry)| LedgerRow {
                    recipient: recipient.clone(),
                    entry: entry.clone(),
                })
                .collect(),
        }
    }
}

/// Proof that a caller deliberately asked to wipe the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetConfirmation(());

impl ResetConfirmation {
    /// The phrase a caller must supply to reset the ledger
    pub const PHRASE: &'static str = "reset the ledger";

    /// # Errors
    /// [`StoreError::ResetNotConfirmed`] unless `phrase` is [`Self::PHRASE`]
    pub fn new(phrase: &str) -> Result<Self> {
        if phrase == Self::PHRASE {
            Ok(Self(()))
        } else {
            Err(StoreError::ResetNotConfirmed)
        }
    }
}

/// The deduplication ledger.
///
/// Recipients are compared by their normalized form. Implementations must
/// persist every state-changing [`LedgerStore::record_success`] before it
/// returns.
#[async_trait]
pub trait LedgerStore: Send + Sync + std::fmt::Debug {
    async fn is_duplicate(
        &self,
        recipient: &Recipient,
        fingerprint: &ContentFingerprint,
    ) -> Result<bool>;

    /// Record a confirmed send; returns whether the pair was new
    async fn record_success(
        &self,
        recipient: &Recipient,
        fingerprint: &ContentFingerprint,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    async fn stats(&self) -> Result<LedgerStats>;

    async fn history(&self, recipient: &Recipient) -> Result<Option<LedgerEntry>>;

    async fn export(&self) -> Result<LedgerSnapshot>;

    /// Irreversibly forget everything
    async fn reset(&self, confirmation: ResetConfirmation) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use envoi_common::FingerprintStrategy;
    use pretty_assertions::assert_eq;

    use super::*;

    fn fingerprint(text: &str) -> ContentFingerprint {
        ContentFingerprint::compute(text, None, FingerprintStrategy::default())
    }

    #[test]
    fn test_record_is_idempotent() {
        let mut book = LedgerBook::default();
        let recipient = Recipient::new("+33 6 12 34 56 78");
        let now = Utc::now();

        assert!(book.record(&recipient, &fingerprint("a"), now));
        assert!(!book.record(&Recipient::new("33612345678"), &fingerprint("a"), now));
        assert!(book.record(&recipient, &fingerprint("b"), now));

        assert_eq!(
            book.stats(),
            LedgerStats {
                total_recipients: 1,
                total_messages: 2,
            }
        );
    }

    #[test]
    fn test_contains_uses_normalized_recipient() {
        let mut book = LedgerBook::default();
        book.record(&Recipient::new("06-12-34-56-78"), &fingerprint("a"), Utc::now());

        assert!(book.contains(&Recipient::new("06 12 34 56 78"), &fingerprint("a")));
        assert!(!book.contains(&Recipient::new("06 12 34 56 78"), &fingerprint("b")));
        assert!(!book.contains(&Recipient::new("0612345679"), &fingerprint("a")));
    }

    #[test]
    fn test_last_sent_tracks_latest() {
        let mut book = LedgerBook::default();
        let recipient = Recipient::new("33612345678");
        let earlier = Utc::now() - TimeDelta::hours(1);
        let later = Utc::now();

        book.record(&recipient, &fingerprint("a"), later);
        book.record(&recipient, &fingerprint("b"), earlier);

        let entry = book.history(&recipient).unwrap();
        assert_eq!(entry.last_sent, later);
        assert_eq!(book.last_updated, Some(later));
    }

    #[test]
    fn test_rollback_restores_previous_state() {
        let mut book = LedgerBook::default();
        let recipient = Recipient::new("33612345678");
        let original = book.clone();

        book.record(&recipient, &fingerprint("a"), Utc::now());
        book.rollback(&recipient, None, None);

        assert_eq!(book, original);
    }

    #[test]
    fn test_snapshot_rows() {
        let mut book = LedgerBook::default();
        book.record(&Recipient::new("33612345678"), &fingerprint("a"), Utc::now());
        book.record(&Recipient::new("33612345679"), &fingerprint("a"), Utc::now());

        let snapshot = book.snapshot();
        assert_eq!(snapshot.stats.total_recipients, 2);
        assert_eq!(snapshot.recipients[0].recipient, "33612345678");
    }

    #[test]
    fn test_reset_requires_phrase() {
        assert!(ResetConfirmation::new(ResetConfirmation::PHRASE).is_ok());
        assert!(matches!(
            ResetConfirmation::new("yes"),
            Err(StoreError::ResetNotConfirmed)
        ));
    }
}
