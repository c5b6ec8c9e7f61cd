use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use event_bus::{AGGREGATE_ID_HEADER, Ack, EVENT_TYPE_HEADER, EventBus, EventBusError, EventMessage};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use write_store::{OutboxEntry, OutboxStore};

use crate::{MIN_POLL_INTERVAL, PublisherConfig, Result};

/// Counts from one drain cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Entries read from the outbox.
    pub fetched: usize,
    /// Entries the bus acknowledged.
    pub published: usize,
    /// Entries whose delivery failed or timed out. The rest of the batch is
    /// skipped after the first one.
    pub failed: usize,
    /// Acknowledged entries that could not be marked processed. They will be
    /// published again.
    pub unmarked: usize,
}

impl DrainReport {
    /// True when the cycle found nothing to publish.
    pub fn is_idle(&self) -> bool {
        self.fetched == 0
    }
}

/// Wakes a running publisher for an immediate drain cycle.
#[derive(Debug, Clone, Default)]
pub struct DrainTrigger(Arc<Notify>);

impl DrainTrigger {
    /// Requests a cycle. Requests made while a cycle is running collapse
    /// into one more cycle.
    pub fn drain_now(&self) {
        self.0.notify_one();
    }

    async fn notified(&self) {
        self.0.notified().await;
    }
}

/// Builds the bus message for an outbox entry.
///
/// The key is the aggregate id, so one aggregate's events share a
/// partition and keep their order.
pub fn to_message(entry: &OutboxEntry) -> Result<EventMessage> {
    let payload = serde_json::to_vec(&entry.event_data)?;
    Ok(EventMessage::new(entry.aggregate_id.as_str(), payload)
        .with_header(EVENT_TYPE_HEADER, entry.event_type.as_str())
        .with_header(AGGREGATE_ID_HEADER, entry.aggregate_id.as_str()))
}

/// Drains the outbox into the event bus.
pub struct OutboxPublisher<O, B>
where
    O: OutboxStore,
    B: EventBus,
{
    outbox: O,
    bus: B,
    config: PublisherConfig,
    trigger: DrainTrigger,
}

impl<O, B> OutboxPublisher<O, B>
where
    O: OutboxStore,
    B: EventBus,
{
    pub fn new(outbox: O, bus: B, config: PublisherConfig) -> Self {
        Self {
            outbox,
            bus,
            config,
            trigger: DrainTrigger::default(),
        }
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// A handle that can wake this publisher from elsewhere.
    pub fn trigger(&self) -> DrainTrigger {
        self.trigger.clone()
    }

    /// Requests an immediate drain cycle from the running loop.
    pub fn drain_now(&self) {
        self.trigger.drain_now();
    }

    /// Runs one drain cycle.
    ///
    /// Fails only if the batch cannot be fetched. Delivery failures are
    /// counted in the report and leave the entries for the next cycle.
    #[tracing::instrument(skip(self), fields(topic = %self.config.topic))]
    pub async fn drain_once(&self) -> Result<DrainReport> {
        let started = Instant::now();
        let batch = self.outbox.fetch_unprocessed(self.config.batch_size).await?;
        let mut report = DrainReport {
            fetched: batch.len(),
            ..DrainReport::default()
        };

        for entry in &batch {
            match self.publish(entry).await {
                Ok(ack) => {
                    report.published += 1;
                    metrics::counter!("outbox_entries_published_total").increment(1);
                    tracing::debug!(
                        outbox_id = %entry.id,
                        aggregate_id = %entry.aggregate_id,
                        event_type = %entry.event_type,
                        partition = ack.partition,
                        offset = ack.offset,
                        "Outbox entry published"
                    );

                    // Already delivered; a failed mark only means a duplicate later.
                    if let Err(e) = self.outbox.mark_processed(entry.id).await {
                        report.unmarked += 1;
                        tracing::warn!(
                            outbox_id = %entry.id,
                            error = %e,
                            "Failed to mark outbox entry processed"
                        );
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    metrics::counter!("outbox_publish_failures_total").increment(1);
                    tracing::warn!(
                        outbox_id = %entry.id,
                        aggregate_id = %entry.aggregate_id,
                        error = %e,
                        skipped = batch.len() - report.published - report.failed,
                        "Outbox publish failed, stopping batch"
                    );
                    break;
                }
            }
        }

        if let Some(retention) = self.config.retention {
            match self.outbox.purge_processed(Utc::now() - retention).await {
                Ok(0) => {}
                Ok(purged) => tracing::debug!(purged, "Purged processed outbox entries"),
                Err(e) => tracing::warn!(error = %e, "Outbox retention sweep failed"),
            }
        }

        metrics::histogram!("outbox_drain_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        Ok(report)
    }

    async fn publish(&self, entry: &OutboxEntry) -> Result<Ack> {
        let message = to_message(entry)?;
        let timeout = self.config.publish_timeout;
        match tokio::time::timeout(timeout, self.bus.publish(&self.config.topic, message)).await {
            Ok(ack) => Ok(ack?),
            Err(_) => Err(EventBusError::Timeout(timeout).into()),
        }
    }

    /// Drains on every tick of the poll interval and on every
    /// [`drain_now`](Self::drain_now) until `shutdown` turns true.
    ///
    /// Shutdown is observed between cycles; a running cycle always finishes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            topic = %self.config.topic,
            interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "Outbox publisher started"
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval.max(MIN_POLL_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.trigger.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        tracing::warn!("Shutdown channel closed, stopping outbox publisher");
                        break;
                    }
                    continue;
                }
            }

            match self.drain_once().await {
                Ok(report) if report.is_idle() => {}
                Ok(report) => tracing::debug!(
                    fetched = report.fetched,
                    published = report.published,
                    failed = report.failed,
                    unmarked = report.unmarked,
                    "Outbox drain cycle finished"
                ),
                Err(e) => tracing::error!(error = %e, "Outbox drain cycle failed"),
            }
        }

        tracing::info!("Outbox publisher stopped");
    }
}

impl<O, B> OutboxPublisher<O, B>
where
    O: OutboxStore + 'static,
    B: EventBus + 'static,
{
    /// Runs the loop on its own task.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}
