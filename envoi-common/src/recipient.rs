//! Message recipients and their normalization.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::RecipientError;

/// Minimum number of digits for a routable recipient
pub const MIN_DIGITS: usize = 8;

/// Maximum number of digits allowed by E.164
pub const MAX_DIGITS: usize = 15;

/// A recipient identifier as supplied by the input source, plus its
/// normalized form.
///
/// Normalization strips every character that is not an ASCII digit, so
/// `+33 6 12-34-56-78` and `0033612345678` only differ by their prefix, and
/// formatting (spaces, dashes, parentheses) never produces a different key.
/// Equality and hashing only consider the normalized form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    raw: String,
    normalized: String,
}

impl Recipient {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let normalized = Self::normalize(&raw);
        Self { raw, normalized }
    }

    /// Strip all non-numeric characters
    #[must_use]
    pub fn normalize(raw: &str) -> String {
        raw.chars().filter(char::is_ascii_digit).collect()
    }

    /// The recipient exactly as it appeared in the input
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The digits-only key used for deduplication
    #[must_use]
    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    /// Check that the recipient is plausibly routable.
    ///
    /// # Errors
    /// Returns a [`RecipientError`] if the normalized form is empty, shorter
    /// than [`MIN_DIGITS`], or longer than [`MAX_DIGITS`].
    pub fn validate(&self) -> Result<(), RecipientError> {
        let digits = self.normalized.len();
        if digits == 0 {
            return Err(RecipientError::Empty(self.raw.clone()));
        }
        if digits < MIN_DIGITS {
            return Err(RecipientError::TooShort {
                raw: self.raw.clone(),
                digits,
                min: MIN_DIGITS,
            });
        }
        if digits > MAX_DIGITS {
            return Err(RecipientError::TooLong {
                raw: self.raw.clone(),
                digits,
                max: MAX_DIGITS,
            });
        }
        Ok(())
    }
}

impl PartialEq for Recipient {
    fn eq(&self, other: &Self) -> bool {
        self.normalized == other.normalized
    }
}

impl Eq for Recipient {}

impl Hash for Recipient {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized.hash(state);
    }
}

impl std::fmt::Display for Recipient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&str> for Recipient {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Recipient {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}
