//! Domain error model.

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type used across the stock domain.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Business-rule rejections surface synchronously and are never retried;
/// only `ConcurrencyConflict` may be retried with a fresh read.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed input or a violated precondition.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Not enough available stock at a key.
    #[error("insufficient stock at {key}: {available} available, {requested} requested")]
    InsufficientStock {
        key: String,
        available: Decimal,
        requested: Decimal,
    },

    /// The state machine does not allow `action` from state `from`.
    #[error("invalid state transition: cannot {action} {entity} in state {from}")]
    InvalidStateTransition {
        entity: &'static str,
        from: String,
        action: &'static str,
    },

    /// The same actor attempted two conflicting roles.
    #[error("segregation of duties violated: {0}")]
    SegregationOfDuties(String),

    /// The depot is frozen by an open physical inventory.
    #[error("movements are frozen for depot {depot}")]
    MovementsFrozen { depot: String },

    /// The lot is blocked, expired or non-conforming.
    #[error("lot {lot} is unavailable ({status})")]
    LotUnavailable { lot: String, status: String },

    /// Stale read or lost race; safe to retry with a fresh read.
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The access-control collaborator did not explicitly allow the action.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Fatal store failure; the operation was aborted with prior state untouched.
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn insufficient(key: impl core::fmt::Display, available: Decimal, requested: Decimal) -> Self {
        Self::InsufficientStock {
            key: key.to_string(),
            available,
            requested,
        }
    }

    pub fn transition(entity: &'static str, from: impl core::fmt::Debug, action: &'static str) -> Self {
        Self::InvalidStateTransition {
            entity,
            from: format!("{from:?}"),
            action,
        }
    }

    pub fn segregation(msg: impl Into<String>) -> Self {
        Self::SegregationOfDuties(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::ConcurrencyConflict(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Only concurrency conflicts may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn insufficient_stock_message_carries_quantities() {
        let err = DomainError::insufficient("X@A", dec!(70), dec!(80));
        let msg = err.to_string();
        assert!(msg.contains("70 available"));
        assert!(msg.contains("80 requested"));
        assert!(!err.is_retryable());
    }
}
