//! The unit of work: one rendered message for one recipient.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{ContentFingerprint, FailureKind, FingerprintStrategy, Recipient};

/// A file sent alongside the message text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    path: PathBuf,
    byte_len: u64,
    /// Hex encoded SHA-256 of the file contents
    digest: String,
}

impl Attachment {
    /// Read an attachment from disk and hash its contents.
    ///
    /// # Errors
    /// If the file cannot be read
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        Ok(Self::from_bytes(path, &bytes))
    }

    /// Build an attachment from contents that are already in memory
    pub fn from_bytes(path: impl Into<PathBuf>, bytes: &[u8]) -> Self {
        Self {
            path: path.into(),
            byte_len: bytes.len() as u64,
            digest: hex::encode(Sha256::digest(bytes)),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn byte_len(&self) -> u64 {
        self.byte_len
    }

    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

/// One message to one recipient, rendered from one input row.
///
/// Immutable once built. Its deduplication identity is
/// `(recipient.normalized(), fingerprint)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendUnit {
    row_index: usize,
    recipient: Recipient,
    content: String,
    attachment: Option<Attachment>,
    fingerprint: ContentFingerprint,
}

impl SendUnit {
    /// A text-only unit fingerprinted with the default strategy
    pub fn new(row_index: usize, recipient: impl Into<Recipient>, content: impl Into<String>) -> Self {
        Self::builder(row_index, recipient, content).build()
    }

    pub fn builder(
        row_index: usize,
        recipient: impl Into<Recipient>,
        content: impl Into<String>,
    ) -> SendUnitBuilder {
        SendUnitBuilder {
            row_index,
            recipient: recipient.into(),
            content: content.into(),
            attachment: None,
            strategy: FingerprintStrategy::default(),
        }
    }

    /// Index of the input row this unit was rendered from
    #[must_use]
    pub const fn row_index(&self) -> usize {
        self.row_index
    }

    #[must_use]
    pub const fn recipient(&self) -> &Recipient {
        &self.recipient
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub const fn attachment(&self) -> Option<&Attachment> {
        self.attachment.as_ref()
    }

    #[must_use]
    pub const fn fingerprint(&self) -> &ContentFingerprint {
        &self.fingerprint
    }

    /// The `(recipient, fingerprint)` pair used for deduplication
    #[must_use]
    pub fn dedup_key(&self) -> (&str, &ContentFingerprint) {
        (self.recipient.normalized(), &self.fingerprint)
    }
}

/// Builder for [`SendUnit`]; the fingerprint is computed in [`Self::build`].
#[derive(Debug, Clone)]
pub struct SendUnitBuilder {
    row_index: usize,
    recipient: Recipient,
    content: String,
    attachment: Option<Attachment>,
    strategy: FingerprintStrategy,
}

impl SendUnitBuilder {
    #[must_use]
    pub fn attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    #[must_use]
    pub const fn fingerprint_strategy(mut self, strategy: FingerprintStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    #[must_use]
    pub fn build(self) -> SendUnit {
        let fingerprint =
            ContentFingerprint::compute(&self.content, self.attachment.as_ref(), self.strategy);
        SendUnit {
            row_index: self.row_index,
            recipient: self.recipient,
            content: self.content,
            attachment: self.attachment,
            fingerprint,
        }
    }
}

/// Where a unit is in its lifecycle within a session.
///
/// ```text
/// Pending ──> InFlight ──> Succeeded
///                │  ^
///                │  └── FailedRetryable (backing off)
///                └────> FailedTerminal
/// Pending ──> FailedTerminal          (rejected before dispatch)
/// Pending ──> Succeeded               (found in the ledger)
/// Pending ──> NotAttempted            (session cancelled)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitStatus {
    Pending,
    InFlight,
    FailedRetryable { attempts: u32, kind: FailureKind },
    Succeeded { attempts: u32 },
    FailedTerminal { attempts: u32, kind: FailureKind },
    NotAttempted,
}

impl UnitStatus {
    /// Returns `true` once the unit will not be touched again in this session
    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(
            self,
            Self::Succeeded { .. } | Self::FailedTerminal { .. } | Self::NotAttempted
        )
    }

    /// Forward-only transition check.
    ///
    /// A pending unit may skip straight to a final status without being
    /// sent: `Succeeded` when the ledger already has it, `FailedTerminal`
    /// when its recipient is invalid.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                Self::Pending,
                Self::InFlight
                    | Self::NotAttempted
                    | Self::Succeeded { .. }
                    | Self::FailedTerminal { .. }
            )
                | (
                    Self::InFlight,
                    Self::FailedRetryable { .. } | Self::Succeeded { .. } | Self::FailedTerminal { .. }
                )
                | (Self::FailedRetryable { .. }, Self::InFlight)
        )
    }
}
