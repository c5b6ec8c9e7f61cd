//! Kafka transport, built on rdkafka.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};

use crate::{Ack, Delivery, EventBus, EventBusError, EventMessage, Result, Subscription};

/// Kafka-backed [`EventBus`].
///
/// The producer waits for every in-sync replica (`acks=all`). Consumers
/// never auto-commit; offsets move only through [`Subscription::commit`].
pub struct KafkaEventBus {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    auto_offset_reset: String,
}

impl KafkaEventBus {
    pub fn new(brokers: &str) -> Result<Self> {
        Self::builder().brokers(brokers).build()
    }

    pub fn builder() -> KafkaEventBusBuilder {
        KafkaEventBusBuilder::default()
    }

    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

#[derive(Debug, Default)]
pub struct KafkaEventBusBuilder {
    brokers: Option<String>,
    client_id: Option<String>,
    acks: Option<String>,
    timeout: Option<Duration>,
    auto_offset_reset: Option<String>,
}

impl KafkaEventBusBuilder {
    /// Comma-separated bootstrap servers.
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Producer acknowledgement mode. Default: `all`.
    pub fn acks(mut self, acks: impl Into<String>) -> Self {
        self.acks = Some(acks.into());
        self
    }

    /// Producer delivery timeout. Default: 5 seconds.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Where a group with no committed offset starts. Default: `earliest`.
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    pub fn build(self) -> Result<KafkaEventBus> {
        let brokers = self
            .brokers
            .ok_or_else(|| EventBusError::ConnectionFailed("brokers not configured".to_string()))?;
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));
        let acks = self.acks.unwrap_or_else(|| "all".to_string());

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set(
                "client.id",
                self.client_id.as_deref().unwrap_or("order-management-service"),
            )
            .set("acks", &acks)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .create()
            .map_err(|e| EventBusError::ConnectionFailed(format!("producer: {e}")))?;

        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| "earliest".to_string());

        tracing::info!(brokers = %brokers, acks = %acks, auto_offset_reset = %auto_offset_reset, "Kafka bus ready");

        Ok(KafkaEventBus {
            producer,
            brokers,
            timeout,
            auto_offset_reset,
        })
    }
}

#[async_trait]
impl EventBus for KafkaEventBus {
    async fn publish(&self, topic: &str, message: EventMessage) -> Result<Ack> {
        let mut headers = OwnedHeaders::new();
        for (key, value) in &message.headers {
            headers = headers.insert(Header {
                key: key.as_str(),
                value: Some(value.as_str()),
            });
        }

        let record = FutureRecord::to(topic)
            .key(message.key.as_str())
            .payload(message.payload.as_slice())
            .headers(headers);

        match self
            .producer
            .send(record, Timeout::After(self.timeout))
            .await
        {
            Ok((partition, offset)) => {
                tracing::debug!(topic, partition, offset, key = %message.key, "Message published");
                Ok(Ack {
                    topic: topic.to_string(),
                    partition,
                    offset,
                })
            }
            Err((error, _)) => {
                tracing::error!(topic, error = %error, "Failed to publish message");
                Err(EventBusError::PublishFailed {
                    topic: topic.to_string(),
                    reason: error.to_string(),
                })
            }
        }
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn Subscription>> {
        let subscription_error = |reason: String| EventBusError::SubscriptionFailed {
            topic: topic.to_string(),
            reason,
        };

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| subscription_error(format!("consumer: {e}")))?;

        consumer
            .subscribe(&[topic])
            .map_err(|e| subscription_error(e.to_string()))?;

        tracing::info!(topic, group, "Subscribed");
        Ok(Box::new(KafkaSubscription { consumer }))
    }
}

/// A consumer-group member on a Kafka topic.
pub struct KafkaSubscription {
    consumer: StreamConsumer,
}

#[async_trait]
impl Subscription for KafkaSubscription {
    async fn next(&mut self) -> Result<Delivery> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| EventBusError::ConnectionFailed(e.to_string()))?;

        let mut headers = BTreeMap::new();
        if let Some(borrowed) = message.headers() {
            for header in borrowed.iter() {
                if let Some(value) = header.value {
                    headers.insert(
                        header.key.to_string(),
                        String::from_utf8_lossy(value).into_owned(),
                    );
                }
            }
        }

        Ok(Delivery {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            message: EventMessage {
                key: message
                    .key()
                    .map(|k| String::from_utf8_lossy(k).into_owned())
                    .unwrap_or_default(),
                payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                headers,
            },
        })
    }

    async fn commit(&mut self, delivery: &Delivery) -> Result<()> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                &delivery.topic,
                delivery.partition,
                Offset::Offset(delivery.offset + 1),
            )
            .map_err(|e| EventBusError::CommitFailed(e.to_string()))?;

        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| EventBusError::CommitFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.consumer.unsubscribe();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kafka_bus_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<KafkaEventBus>();
    }

    #[test]
    fn build_without_brokers_fails() {
        assert!(matches!(
            KafkaEventBus::builder().build(),
            Err(EventBusError::ConnectionFailed(_))
        ));
    }
}
