use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::Delivery;

/// How a handler failed, which decides what happens to the message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The message may succeed later; retry it in place.
    #[error("retryable: {0}")]
    Retryable(String),

    /// The message can never succeed; dead-letter it.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl HandlerError {
    pub fn retryable(reason: impl std::fmt::Display) -> Self {
        HandlerError::Retryable(reason.to_string())
    }

    pub fn fatal(reason: impl std::fmt::Display) -> Self {
        HandlerError::Fatal(reason.to_string())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, HandlerError::Retryable(_))
    }
}

/// Processes one delivery.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError>;
}

#[async_trait]
impl<H: MessageHandler + ?Sized> MessageHandler for Arc<H> {
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        (**self).handle(delivery).await
    }
}
