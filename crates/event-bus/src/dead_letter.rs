use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::{Delivery, EventBus, Result};

/// A message given up on, with the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub delivery: Delivery,
    pub reason: String,
    pub attempts: u32,
    /// True when the handler reported the message as unprocessable rather
    /// than running out of retries.
    pub fatal: bool,
    pub dead_lettered_at: DateTime<Utc>,
}

/// Where poison messages go.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn send(&self, letter: DeadLetter) -> Result<()>;
}

/// Keeps dead letters in memory for inspection.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDeadLetterQueue {
    letters: Arc<Mutex<Vec<DeadLetter>>>,
}

impl InMemoryDeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn letters(&self) -> Vec<DeadLetter> {
        self.letters.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.letters.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.letters.lock().await.is_empty()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterQueue {
    async fn send(&self, letter: DeadLetter) -> Result<()> {
        self.letters.lock().await.push(letter);
        Ok(())
    }
}

/// Republishes dead letters to `<topic>.dlq` on the same bus.
///
/// The original key and payload are kept; the failure is described in
/// `x-*` headers.
#[derive(Clone)]
pub struct TopicDeadLetterSink {
    bus: Arc<dyn EventBus>,
    suffix: String,
}

impl TopicDeadLetterSink {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self {
            bus,
            suffix: ".dlq".to_string(),
        }
    }

    pub fn dead_letter_topic(&self, topic: &str) -> String {
        format!("{topic}{}", self.suffix)
    }
}

#[async_trait]
impl DeadLetterSink for TopicDeadLetterSink {
    async fn send(&self, letter: DeadLetter) -> Result<()> {
        let delivery = &letter.delivery;
        let message = delivery
            .message
            .clone()
            .with_header("x-original-topic", delivery.topic.as_str())
            .with_header("x-original-partition", delivery.partition.to_string())
            .with_header("x-original-offset", delivery.offset.to_string())
            .with_header("x-error", letter.reason.as_str())
            .with_header("x-attempts", letter.attempts.to_string())
            .with_header("x-dead-lettered-at", letter.dead_lettered_at.to_rfc3339());

        let topic = self.dead_letter_topic(&delivery.topic);
        self.bus.publish(&topic, message).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EventMessage, InMemoryEventBus};

    fn letter() -> DeadLetter {
        DeadLetter {
            delivery: Delivery {
                topic: "orders".to_string(),
                partition: 2,
                offset: 7,
                message: EventMessage::new("order-9", b"not json".to_vec())
                    .with_header("event-type", "OrderCreated"),
            },
            reason: "expected value at line 1".to_string(),
            attempts: 1,
            fatal: true,
            dead_lettered_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn in_memory_queue_keeps_letters() {
        let queue = InMemoryDeadLetterQueue::new();
        assert!(queue.is_empty().await);
        queue.send(letter()).await.unwrap();
        assert_eq!(queue.len().await, 1);
        assert!(queue.letters().await[0].fatal);
    }

    #[tokio::test]
    async fn topic_sink_republishes_with_failure_headers() {
        let bus = InMemoryEventBus::new();
        let sink = TopicDeadLetterSink::new(Arc::new(bus.clone()));

        sink.send(letter()).await.unwrap();

        let dead = bus.messages("orders.dlq");
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].key, "order-9");
        assert_eq!(dead[0].payload, b"not json".to_vec());
        assert_eq!(dead[0].header("event-type"), Some("OrderCreated"));
        assert_eq!(dead[0].header("x-original-offset"), Some("7"));
        assert_eq!(dead[0].header("x-attempts"), Some("1"));
    }
}
