//! Error types for the envoi-common crate.

use thiserror::Error;

/// A recipient that can never be delivered to.
///
/// These are input errors: they are terminal for the unit and are never
/// retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecipientError {
    /// The recipient contained no digits at all.
    #[error("Recipient {0:?} contains no digits")]
    Empty(String),

    /// Fewer digits than any routable number.
    #[error("Recipient {raw:?} is too short ({digits} digits, minimum {min})")]
    TooShort {
        raw: String,
        digits: usize,
        min: usize,
    },

    /// More digits than E.164 allows.
    #[error("Recipient {raw:?} is too long ({digits} digits, maximum {max})")]
    TooLong {
        raw: String,
        digits: usize,
        max: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = RecipientError::TooShort {
            raw: "12-34".to_string(),
            digits: 4,
            min: 8,
        };
        assert_eq!(
            error.to_string(),
            "Recipient \"12-34\" is too short (4 digits, minimum 8)"
        );
    }
}
