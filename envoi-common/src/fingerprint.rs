//! Deterministic fingerprints over rendered message content.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::Attachment;

/// Number of digest bytes kept in a fingerprint
const FINGERPRINT_BYTES: usize = 16;

/// How an attachment contributes to a [`ContentFingerprint`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FingerprintStrategy {
    /// Hash the attachment's bytes (SHA-256).
    #[default]
    ContentHash,
    /// Only use the attachment's length.
    ///
    /// Two different files of the same size collide under this strategy.
    /// It is kept for compatibility with ledgers built that way and should
    /// not be chosen for new deployments.
    ByteLength,
}

/// Identity of a rendered message for deduplication purposes.
///
/// Stored as lowercase hex. Two units sent to the same recipient with equal
/// fingerprints are duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentFingerprint(String);

impl ContentFingerprint {
    #[must_use]
    pub fn compute(
        content: &str,
        attachment: Option<&Attachment>,
        strategy: FingerprintStrategy,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"text:");
        hasher.update((content.len() as u64).to_be_bytes());
        hasher.update(content.as_bytes());

        match (attachment, strategy) {
            (None, _) => hasher.update(b"\0none"),
            (Some(attachment), FingerprintStrategy::ContentHash) => {
                hasher.update(b"\0sha256:");
                hasher.update(attachment.digest().as_bytes());
            }
            (Some(attachment), FingerprintStrategy::ByteLength) => {
                hasher.update(b"\0len:");
                hasher.update(attachment.byte_len().to_be_bytes());
            }
        }

        let digest = hasher.finalize();
        Self(hex::encode(&digest[..FINGERPRINT_BYTES]))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
