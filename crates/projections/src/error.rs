//! Projection error types.

use common::AggregateId;
use thiserror::Error;
use write_store::Version;

/// Errors that can occur while projecting events into the read model.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// The event needs a record that has not been projected yet.
    #[error("Read model not found for order {0}")]
    NotFound(AggregateId),

    /// The event skips over versions that have not been applied yet.
    #[error("Out-of-order event for order {aggregate_id}: expected version {expected}, got {actual}")]
    OutOfOrder {
        aggregate_id: AggregateId,
        expected: Version,
        actual: Version,
    },

    /// Failed to deserialize an event payload.
    #[error("Event deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// The event cannot be applied to the record, e.g. its total overflows.
    #[error("Invalid event: {0}")]
    InvalidEvent(#[from] domain::OrderError),

    /// The read-model database failed.
    #[error("Read model storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// The read-model store is unreachable.
    #[error("Read model store unavailable: {0}")]
    Unavailable(String),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The cache failed.
    #[error("Cache error: {0}")]
    Cache(String),

    /// Reading the write-side event log failed during a rebuild.
    #[error("Event log error: {0}")]
    EventLog(#[from] write_store::StoreError),
}

impl ProjectionError {
    /// True when handling the same event again may succeed.
    ///
    /// Parse failures never will; the message is poison.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProjectionError::NotFound(_)
            | ProjectionError::OutOfOrder { .. }
            | ProjectionError::Storage(_)
            | ProjectionError::Unavailable(_)
            | ProjectionError::Cache(_) => true,
            ProjectionError::EventLog(e) => e.is_transient(),
            ProjectionError::Deserialization(_)
            | ProjectionError::InvalidEvent(_)
            | ProjectionError::Migration(_) => false,
        }
    }
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;
