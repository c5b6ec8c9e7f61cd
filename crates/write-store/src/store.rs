use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{
    AggregateId, AggregateRecord, EventRecord, OutboxEntry, Result, StoreError,
    Version,
};

/// A stream of event-log records.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<EventRecord>> + Send>>;

/// Everything one command writes, committed as a single transaction.
#[derive(Debug, Clone)]
pub struct UnitOfWork {
    /// The aggregate state after the command.
    pub aggregate: AggregateRecord,

    /// The version the command was decided against. `Version::initial()`
    /// means the aggregate must not exist yet.
    pub expected_version: Version,

    /// Event-log rows, in version order.
    pub events: Vec<EventRecord>,

    /// Outbox rows, in publication order.
    pub outbox: Vec<OutboxEntry>,
}

impl UnitOfWork {
    /// Creates a unit of work whose outbox mirrors `events` one-to-one.
    pub fn new(
        aggregate: AggregateRecord,
        expected_version: Version,
        events: Vec<EventRecord>,
    ) -> Self {
        let outbox = events.iter().map(OutboxEntry::for_event).collect();
        Self {
            aggregate,
            expected_version,
            events,
            outbox,
        }
    }

    /// Returns the aggregate this unit of work targets.
    pub fn aggregate_id(&self) -> &AggregateId {
        &self.aggregate.aggregate_id
    }

    /// Checks the shape of the unit of work before any write happens.
    ///
    /// Events must be non-empty, belong to the aggregate, and carry
    /// contiguous versions starting right after `expected_version`; the
    /// aggregate record must sit at the last event's version.
    pub fn validate(&self) -> Result<()> {
        if self.events.is_empty() {
            return Err(StoreError::InvalidUnitOfWork(
                "unit of work has no events".to_string(),
            ));
        }

        let aggregate_id = self.aggregate_id();
        let mut expected = self.expected_version;
        for event in &self.events {
            if &event.aggregate_id != aggregate_id {
                return Err(StoreError::InvalidUnitOfWork(format!(
                    "event {} belongs to {}, not {}",
                    event.event_id, event.aggregate_id, aggregate_id
                )));
            }
            expected = expected.next();
            if event.version != expected {
                return Err(StoreError::InvalidUnitOfWork(format!(
                    "expected event version {expected}, got {}",
                    event.version
                )));
            }
        }

        if self.aggregate.version != expected {
            return Err(StoreError::InvalidUnitOfWork(format!(
                "aggregate record at version {}, last event at {expected}",
                self.aggregate.version
            )));
        }

        if let Some(stray) = self
            .outbox
            .iter()
            .find(|entry| &entry.aggregate_id != aggregate_id)
        {
            return Err(StoreError::InvalidUnitOfWork(format!(
                "outbox entry {} belongs to {}",
                stray.id, stray.aggregate_id
            )));
        }

        Ok(())
    }
}

/// The write side's transactional store.
#[async_trait]
pub trait WriteStore: Send + Sync {
    /// Atomically writes the aggregate record, the event-log rows and the
    /// outbox rows of `work`.
    ///
    /// Fails with `ConcurrencyConflict` when the stored version is not
    /// `work.expected_version`; in that case, or on any other error, nothing
    /// is written. Returns the new aggregate version.
    async fn commit(&self, work: UnitOfWork) -> Result<Version>;

    /// Loads the current record of an aggregate.
    async fn load_aggregate(&self, aggregate_id: &AggregateId)
    -> Result<Option<AggregateRecord>>;

    /// Returns the event log of one aggregate in version order.
    async fn events_for_aggregate(&self, aggregate_id: &AggregateId) -> Result<Vec<EventRecord>>;

    /// Streams the whole event log in commit order.
    async fn stream_all_events(&self) -> Result<EventStream>;
}

#[async_trait]
impl<T: WriteStore + ?Sized> WriteStore for Arc<T> {
    async fn commit(&self, work: UnitOfWork) -> Result<Version> {
        (**self).commit(work).await
    }

    async fn load_aggregate(
        &self,
        aggregate_id: &AggregateId,
    ) -> Result<Option<AggregateRecord>> {
        (**self).load_aggregate(aggregate_id).await
    }

    async fn events_for_aggregate(&self, aggregate_id: &AggregateId) -> Result<Vec<EventRecord>> {
        (**self).events_for_aggregate(aggregate_id).await
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        (**self).stream_all_events().await
    }
}
