//! Outcomes of a single send attempt.

use serde::{Deserialize, Serialize};

/// Why a send attempt failed.
///
/// Kinds are bucketed coarsely so that the error histogram surfaces
/// systemic problems instead of one bucket per raw message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FailureKind {
    /// The recipient is malformed or unknown to the remote service.
    InvalidRecipient,
    /// The remote service permanently rejected the content.
    ContentRejected,
    /// The attachment could not be read or was refused.
    InvalidAttachment,
    /// The attempt did not complete within its timeout.
    Timeout,
    /// The connection could not be established or was dropped.
    ConnectionFailed,
    /// The remote service asked us to slow down.
    Throttled,
    /// The remote service reported a temporary outage.
    Unavailable,
}

impl FailureKind {
    /// Returns `true` if a later attempt may succeed.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::ConnectionFailed | Self::Throttled | Self::Unavailable
        )
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRecipient => "invalid-recipient",
            Self::ContentRejected => "content-rejected",
            Self::InvalidAttachment => "invalid-attachment",
            Self::Timeout => "timeout",
            Self::ConnectionFailed => "connection-failed",
            Self::Throttled => "throttled",
            Self::Unavailable => "unavailable",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed attempt, classified and with the transport's description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendFailure {
    pub kind: FailureKind,
    pub detail: String,
}

impl SendFailure {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for SendFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

/// What the transport reports for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The remote service confirmed the message.
    Success,
    /// The attempt failed but may be retried.
    Retryable(SendFailure),
    /// The attempt failed and must not be retried.
    Terminal(SendFailure),
}

impl SendOutcome {
    pub fn retryable(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self::Retryable(SendFailure::new(kind, detail))
    }

    pub fn terminal(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self::Terminal(SendFailure::new(kind, detail))
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}
