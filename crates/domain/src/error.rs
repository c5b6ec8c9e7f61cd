//! Domain error types.

use thiserror::Error;
use write_store::StoreError;

use crate::order::OrderError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the write store.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A business rule rejected the command.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// Aggregate not found.
    #[error("Aggregate not found: {aggregate_type} with id {aggregate_id}")]
    AggregateNotFound {
        aggregate_type: &'static str,
        aggregate_id: String,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    /// True for rejections the caller caused; retrying cannot help.
    pub fn is_rule_violation(&self) -> bool {
        matches!(self, DomainError::Order(_))
    }

    /// True for storage failures that may clear up on their own.
    pub fn is_retryable(&self) -> bool {
        match self {
            DomainError::Store(e) => e.is_transient(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DomainError::AggregateNotFound { .. } | DomainError::Store(StoreError::AggregateNotFound(_))
        )
    }

    /// True when the command lost a race or contradicts the current state.
    pub fn is_conflict(&self) -> bool {
        match self {
            DomainError::Store(StoreError::ConcurrencyConflict { .. }) => true,
            DomainError::Order(e) => e.is_conflict(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::OrderStatus;
    use common::AggregateId;
    use write_store::Version;

    #[test]
    fn test_rule_violation_is_not_retryable() {
        let err = DomainError::from(OrderError::NoItems);
        assert!(err.is_rule_violation());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_storage_failure_is_retryable() {
        let err = DomainError::from(StoreError::Unavailable("down".to_string()));
        assert!(!err.is_rule_violation());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_conflicts() {
        let stale = DomainError::from(StoreError::ConcurrencyConflict {
            aggregate_id: AggregateId::from("o-1"),
            expected: Version::new(1),
            actual: Version::new(2),
        });
        assert!(stale.is_conflict());

        let illegal = DomainError::from(OrderError::InvalidStatusTransition {
            from: OrderStatus::Shipped,
            to: OrderStatus::Cancelled,
        });
        assert!(illegal.is_conflict());
        assert!(illegal.is_rule_violation());

        assert!(!DomainError::from(OrderError::NoItems).is_conflict());
    }
}
