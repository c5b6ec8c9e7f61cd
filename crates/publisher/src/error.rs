use event_bus::EventBusError;
use thiserror::Error;
use write_store::StoreError;

/// Errors raised while draining the outbox.
#[derive(Debug, Error)]
pub enum PublisherError {
    /// Reading or updating the outbox failed.
    #[error("Outbox error: {0}")]
    Store(#[from] StoreError),

    /// The bus rejected the message or did not answer in time.
    #[error("Event bus error: {0}")]
    Bus(#[from] EventBusError),

    /// The stored event body could not be encoded for the wire.
    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result type for publisher operations.
pub type Result<T> = std::result::Result<T, PublisherError>;
