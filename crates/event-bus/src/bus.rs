use async_trait::async_trait;

use crate::{Ack, Delivery, EventMessage, Result};

/// A partitioned, at-least-once message transport.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publishes a message and waits for the broker to accept it.
    async fn publish(&self, topic: &str, message: EventMessage) -> Result<Ack>;

    /// Joins `group` on `topic`.
    ///
    /// Reading starts at the group's committed position, so anything that
    /// was delivered but never committed is delivered again.
    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn Subscription>>;
}

/// A consumer-group membership on one topic.
#[async_trait]
pub trait Subscription: Send {
    /// Waits for the next message.
    ///
    /// Cancel-safe: dropping the future before it resolves loses nothing.
    async fn next(&mut self) -> Result<Delivery>;

    /// Records `delivery` as fully processed for the group.
    async fn commit(&mut self, delivery: &Delivery) -> Result<()>;

    /// Leaves the group.
    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
impl<T: EventBus + ?Sized> EventBus for std::sync::Arc<T> {
    async fn publish(&self, topic: &str, message: EventMessage) -> Result<Ack> {
        (**self).publish(topic, message).await
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn Subscription>> {
        (**self).subscribe(topic, group).await
    }
}
