//! The subscription loop that feeds the projection from the bus.

use std::sync::Arc;
use std::time::Duration;

use event_bus::{
    DeadLetterSink, Delivery, DeliveryOutcome, EventBus, MessageHandler, RetryPolicy,
    Subscription, deliver,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Topic order events are published to.
pub const DEFAULT_TOPIC: &str = "orders";

/// Consumer group of the reporting read model.
pub const DEFAULT_GROUP: &str = "order-reporting-service";

/// Pause after the bus fails to hand out a message.
const BUS_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Lifecycle of a [`ProjectionConsumer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Stopped,
    Subscribing,
    Running,
    Stopping,
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub topic: String,
    pub group: String,
    pub retry: RetryPolicy,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            group: DEFAULT_GROUP.to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl ConsumerConfig {
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Subscribes a [`MessageHandler`] to the bus and runs it until shutdown.
///
/// Messages are handled one at a time. Each is committed only after the
/// handler succeeded or the message was dead-lettered, so a crash replays
/// from the last committed offset. The shutdown signal is honoured while
/// waiting for the next message and between retries, never in the middle of
/// a handler call.
pub struct ProjectionConsumer {
    config: ConsumerConfig,
    bus: Arc<dyn EventBus>,
    handler: Arc<dyn MessageHandler>,
    dead_letters: Arc<dyn DeadLetterSink>,
}

/// Observes and awaits a spawned consumer.
pub struct ConsumerHandle {
    state: watch::Receiver<ConsumerState>,
    join: JoinHandle<event_bus::Result<()>>,
}

impl ConsumerHandle {
    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Waits until the consumer reaches `state`. Returns false if the task
    /// ended without reaching it.
    pub async fn wait_for(&mut self, state: ConsumerState) -> bool {
        self.state.wait_for(|current| *current == state).await.is_ok()
    }

    /// Waits for the consumer task to finish.
    pub async fn join(self) -> event_bus::Result<()> {
        match self.join.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "Projection consumer task panicked");
                Ok(())
            }
        }
    }
}

impl ProjectionConsumer {
    pub fn new(
        config: ConsumerConfig,
        bus: Arc<dyn EventBus>,
        handler: Arc<dyn MessageHandler>,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Self {
        Self {
            config,
            bus,
            handler,
            dead_letters,
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Starts the consumer on its own task.
    ///
    /// Sending `true` on the shutdown channel, or dropping its sender, stops
    /// the consumer.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> ConsumerHandle {
        let (state_tx, state_rx) = watch::channel(ConsumerState::Stopped);
        let join = tokio::spawn(async move { self.run(shutdown, state_tx).await });
        ConsumerHandle {
            state: state_rx,
            join,
        }
    }

    async fn run(
        self,
        mut shutdown: watch::Receiver<bool>,
        state: watch::Sender<ConsumerState>,
    ) -> event_bus::Result<()> {
        state.send_replace(ConsumerState::Subscribing);
        let mut subscription = match self
            .bus
            .subscribe(&self.config.topic, &self.config.group)
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::error!(
                    topic = %self.config.topic,
                    group = %self.config.group,
                    error = %e,
                    "Projection consumer failed to subscribe"
                );
                state.send_replace(ConsumerState::Stopped);
                return Err(e);
            }
        };

        state.send_replace(ConsumerState::Running);
        tracing::info!(
            topic = %self.config.topic,
            group = %self.config.group,
            "Projection consumer running"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let next = tokio::select! {
                next = subscription.next() => next,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        tracing::warn!("Shutdown channel closed, stopping projection consumer");
                        break;
                    }
                    continue;
                }
            };

            let delivery = match next {
                Ok(delivery) => delivery,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to receive message");
                    if pause(&mut shutdown, BUS_ERROR_BACKOFF).await {
                        break;
                    }
                    continue;
                }
            };

            if !self
                .process(subscription.as_mut(), &delivery, &mut shutdown)
                .await
            {
                break;
            }
        }

        state.send_replace(ConsumerState::Stopping);
        if let Err(e) = subscription.close().await {
            tracing::warn!(error = %e, "Failed to close subscription");
        }
        state.send_replace(ConsumerState::Stopped);
        tracing::info!("Projection consumer stopped");
        Ok(())
    }

    /// Handles one delivery and commits it. Returns false when the consumer
    /// should stop.
    async fn process(
        &self,
        subscription: &mut dyn Subscription,
        delivery: &Delivery,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        tracing::debug!(
            topic = %delivery.topic,
            partition = delivery.partition,
            offset = delivery.offset,
            key = %delivery.message.key,
            "Message received"
        );

        loop {
            let outcome = deliver(
                self.handler.as_ref(),
                delivery,
                &self.config.retry,
                self.dead_letters.as_ref(),
                shutdown,
            )
            .await;

            match outcome {
                Ok(outcome) if outcome.should_commit() => {
                    if let Err(e) = subscription.commit(delivery).await {
                        tracing::warn!(
                            partition = delivery.partition,
                            offset = delivery.offset,
                            error = %e,
                            "Failed to commit offset"
                        );
                    }
                    return true;
                }
                Ok(DeliveryOutcome::Cancelled { attempts }) => {
                    tracing::info!(
                        partition = delivery.partition,
                        offset = delivery.offset,
                        attempts,
                        "Shutdown during retry, leaving message uncommitted"
                    );
                    return false;
                }
                Ok(_) => return true,
                Err(e) => {
                    // The message was neither handled nor parked; try again.
                    tracing::error!(
                        partition = delivery.partition,
                        offset = delivery.offset,
                        error = %e,
                        "Dead-letter sink failed"
                    );
                    if pause(shutdown, self.config.retry.max_backoff).await {
                        return false;
                    }
                }
            }
        }
    }
}

/// Sleeps for `duration` unless shutdown arrives first. Returns true on
/// shutdown.
async fn pause(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}
