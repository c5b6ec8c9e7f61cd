use thiserror::Error;

use crate::{AggregateId, OutboxId, Version};

/// Errors raised by the write-side stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another command committed against the aggregate first.
    #[error(
        "Concurrency conflict for aggregate {aggregate_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        aggregate_id: AggregateId,
        expected: Version,
        actual: Version,
    },

    /// No aggregate record exists for the id.
    #[error("Aggregate not found: {0}")]
    AggregateNotFound(AggregateId),

    /// `mark_processed` matched no outbox row.
    #[error("Outbox entry not found: {0}")]
    OutboxEntryNotFound(OutboxId),

    /// The unit of work is malformed (empty, mixed aggregates, version gaps).
    #[error("Invalid unit of work: {0}")]
    InvalidUnitOfWork(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Returns true for failures that may succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable(_) | StoreError::ConcurrencyConflict { .. } => true,
            StoreError::Database(err) => matches!(
                err,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_is_transient() {
        assert!(StoreError::Unavailable("down".into()).is_transient());
        assert!(StoreError::Database(sqlx::Error::PoolTimedOut).is_transient());
    }

    #[test]
    fn malformed_work_is_not_transient() {
        assert!(!StoreError::InvalidUnitOfWork("empty".into()).is_transient());
        assert!(!StoreError::AggregateNotFound(AggregateId::from("x")).is_transient());
    }
}
