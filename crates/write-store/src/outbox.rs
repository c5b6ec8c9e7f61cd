//! Outbox rows and the publisher-facing outbox interface.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AggregateId, EventRecord, Result};

/// Identifier of an outbox row, distinct from the aggregate id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutboxId(Uuid);

impl OutboxId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OutboxId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OutboxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An event waiting to be handed to the bus.
///
/// Created in the same transaction as the aggregate mutation that produced
/// it. Flipped to processed once the bus acknowledged delivery; rows are
/// kept afterwards for audit until a retention sweep removes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: OutboxId,

    /// Partition key on the bus.
    pub aggregate_id: AggregateId,

    pub event_type: String,

    /// The serialized event, exactly as it goes on the wire.
    pub event_data: serde_json::Value,

    pub created_at: DateTime<Utc>,

    pub processed: bool,

    pub processed_at: Option<DateTime<Utc>>,
}

impl OutboxEntry {
    /// Creates an unprocessed entry.
    pub fn new(
        aggregate_id: AggregateId,
        event_type: impl Into<String>,
        event_data: serde_json::Value,
    ) -> Self {
        Self {
            id: OutboxId::new(),
            aggregate_id,
            event_type: event_type.into(),
            event_data,
            created_at: Utc::now(),
            processed: false,
            processed_at: None,
        }
    }

    /// Creates the outbox twin of an event-log record.
    pub fn for_event(record: &EventRecord) -> Self {
        Self {
            id: OutboxId::new(),
            aggregate_id: record.aggregate_id.clone(),
            event_type: record.event_type.clone(),
            event_data: record.event_data.clone(),
            created_at: record.occurred_at,
            processed: false,
            processed_at: None,
        }
    }
}

/// The outbox as seen by the publisher.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Returns at most `limit` unprocessed entries, oldest first.
    ///
    /// Entries created in the same transaction come back in insertion order.
    async fn fetch_unprocessed(&self, limit: usize) -> Result<Vec<OutboxEntry>>;

    /// Flags an entry as delivered.
    ///
    /// Fails with `OutboxEntryNotFound` if no row has this id.
    async fn mark_processed(&self, id: OutboxId) -> Result<()>;

    /// Number of entries still waiting for delivery.
    async fn pending_count(&self) -> Result<u64>;

    /// Deletes processed entries older than `older_than`, returning how many
    /// were removed. Unprocessed entries are never touched.
    async fn purge_processed(&self, older_than: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
impl<T: OutboxStore + ?Sized> OutboxStore for Arc<T> {
    async fn fetch_unprocessed(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        (**self).fetch_unprocessed(limit).await
    }

    async fn mark_processed(&self, id: OutboxId) -> Result<()> {
        (**self).mark_processed(id).await
    }

    async fn pending_count(&self) -> Result<u64> {
        (**self).pending_count().await
    }

    async fn purge_processed(&self, older_than: DateTime<Utc>) -> Result<u64> {
        (**self).purge_processed(older_than).await
    }
}
