use std::time::Duration;

use thiserror::Error;

/// Errors raised by a bus transport.
#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("Failed to connect to the bus: {0}")]
    ConnectionFailed(String),

    #[error("Failed to publish to topic '{topic}': {reason}")]
    PublishFailed { topic: String, reason: String },

    #[error("Failed to subscribe to topic '{topic}': {reason}")]
    SubscriptionFailed { topic: String, reason: String },

    #[error("Failed to commit offset: {0}")]
    CommitFailed(String),

    #[error("Event bus unavailable: {0}")]
    Unavailable(String),

    #[error("Bus operation timed out after {0:?}")]
    Timeout(Duration),
}

impl EventBusError {
    /// Returns true if retrying the operation later may succeed.
    ///
    /// Every transport failure is transient from the caller's point of view;
    /// only a subscription set up with a bad topic or group is not.
    pub fn is_transient(&self) -> bool {
        !matches!(self, EventBusError::SubscriptionFailed { .. })
    }
}

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, EventBusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_failure_names_topic() {
        let err = EventBusError::PublishFailed {
            topic: "orders".to_string(),
            reason: "broker down".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to publish to topic 'orders': broker down"
        );
        assert!(err.is_transient());
    }

    #[test]
    fn subscription_failure_is_not_transient() {
        let err = EventBusError::SubscriptionFailed {
            topic: "orders".to_string(),
            reason: "unknown topic".to_string(),
        };
        assert!(!err.is_transient());
        assert!(EventBusError::Timeout(Duration::from_secs(1)).is_transient());
    }
}
