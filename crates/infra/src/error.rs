//! Service-boundary error taxonomy.
//!
//! Every `TransferService` operation fails with one of these. Domain errors
//! and store errors are folded in through the `From` impls below so call
//! sites can use `?` throughout.

use thiserror::Error;

use depot_core::{DomainError, StockShortfall};

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed request. Never retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The requested state change is not in the transition table.
    #[error("illegal transition from {from} to {to}")]
    IllegalTransition { from: String, to: String },

    /// One or more lines cannot be covered at their source location.
    #[error("insufficient stock for {} line(s)", .0.len())]
    InsufficientStock(Vec<StockShortfall>),

    /// Stale version; reloading and retrying is safe.
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Number allocation kept colliding after the internal retries.
    #[error("numbering conflict: {0}")]
    NumberingConflict(String),

    /// Infrastructure failure.
    #[error("store failure: {0}")]
    Store(StoreError),
}

impl ServiceError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Stable machine-readable code, used by the HTTP layer and in logs.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::InvalidInput(_) => "invalid_input",
            ServiceError::IllegalTransition { .. } => "illegal_transition",
            ServiceError::InsufficientStock(_) => "insufficient_stock",
            ServiceError::ConcurrentModification(_) => "concurrent_modification",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::NumberingConflict(_) => "numbering_conflict",
            ServiceError::Store(_) => "store_failure",
        }
    }
}

impl From<DomainError> for ServiceError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => ServiceError::InvalidInput(msg),
            DomainError::InvalidId(msg) => ServiceError::InvalidInput(msg),
            DomainError::InvariantViolation(msg) => ServiceError::InvalidInput(msg),
            DomainError::IllegalTransition { from, to } => ServiceError::IllegalTransition { from, to },
            DomainError::InsufficientStock(shortfalls) => ServiceError::InsufficientStock(shortfalls),
            DomainError::NotFound(what) => ServiceError::NotFound(what),
            DomainError::Conflict(msg) => ServiceError::ConcurrentModification(msg),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Concurrency(msg) => ServiceError::ConcurrentModification(msg),
            StoreError::InsufficientStock(shortfalls) => ServiceError::InsufficientStock(shortfalls),
            StoreError::NumberingConflict(msg) => ServiceError::NumberingConflict(msg),
            StoreError::InvalidMovement(msg) => ServiceError::InvalidInput(msg),
            other => ServiceError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_to_service_taxonomy() {
        let err: ServiceError = DomainError::illegal_transition("received", "draft").into();
        assert!(matches!(
            err,
            ServiceError::IllegalTransition { ref from, ref to } if from == "received" && to == "draft"
        ));
        assert_eq!(err.code(), "illegal_transition");

        let err: ServiceError = DomainError::validation("bad").into();
        assert_eq!(err.code(), "invalid_input");
    }

    #[test]
    fn store_concurrency_is_a_concurrent_modification() {
        let err: ServiceError = StoreError::Concurrency("stale".into()).into();
        assert!(matches!(err, ServiceError::ConcurrentModification(_)));

        let err: ServiceError = StoreError::Backend("down".into()).into();
        assert!(matches!(err, ServiceError::Store(StoreError::Backend(_))));
    }
}
