//! Errors raised while building or validating account and session records.

use thiserror::Error;

/// Deterministic rejection of a value or a record.
///
/// Storage and transport failures belong to the layers that own them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Input broke a field rule; the message is safe to show to the caller.
    #[error("{0}")]
    Validation(String),

    /// A record would break one of its own invariants.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid {kind}: {reason}")]
    InvalidId { kind: &'static str, reason: String },
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(kind: &'static str, reason: impl core::fmt::Display) -> Self {
        Self::InvalidId {
            kind,
            reason: reason.to_string(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_is_passed_through() {
        let err = DomainError::validation("username too short");
        assert_eq!(err.to_string(), "username too short");
        assert!(err.is_validation());
        assert!(!DomainError::invariant("x").is_validation());
    }
}
