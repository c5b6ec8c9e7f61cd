use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::{
    AggregateId, AggregateRecord, EventRecord, OutboxEntry, OutboxId, OutboxStore,
    Result, StoreError, Version,
    store::{EventStream, UnitOfWork, WriteStore},
};

/// Switches that make the in-memory store fail on purpose.
///
/// Used to exercise rollback and redelivery paths without a database.
#[derive(Debug, Default)]
pub struct FaultPlan {
    unavailable: AtomicBool,
    fail_event_log: AtomicBool,
    fail_outbox: AtomicBool,
    fail_marks: AtomicU32,
}

impl FaultPlan {
    /// Every operation fails with `Unavailable` while set.
    pub fn set_unavailable(&self, value: bool) {
        self.unavailable.store(value, Ordering::SeqCst);
    }

    /// Commits fail while writing the event log.
    pub fn fail_event_log_writes(&self, value: bool) {
        self.fail_event_log.store(value, Ordering::SeqCst);
    }

    /// Commits fail while writing the outbox, after the aggregate and event
    /// log writes have been staged.
    pub fn fail_outbox_writes(&self, value: bool) {
        self.fail_outbox.store(value, Ordering::SeqCst);
    }

    /// The next `count` calls to `mark_processed` fail.
    pub fn fail_next_marks(&self, count: u32) {
        self.fail_marks.store(count, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store offline".to_string()));
        }
        Ok(())
    }

    fn take_mark_failure(&self) -> bool {
        self.fail_marks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[derive(Debug, Default)]
struct Tables {
    aggregates: HashMap<AggregateId, AggregateRecord>,
    events: Vec<EventRecord>,
    outbox: Vec<OutboxEntry>,
}

/// In-memory write store.
///
/// All three tables sit behind one lock, so a commit is atomic with respect
/// to every reader and writer. Writes are staged and only applied once every
/// step succeeded, which gives the same all-or-nothing outcome as the
/// PostgreSQL transaction.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<Mutex<Tables>>,
    faults: Arc<FaultPlan>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the fault switches of this store.
    pub fn faults(&self) -> &FaultPlan {
        &self.faults
    }

    /// Returns the total number of event-log rows.
    pub async fn event_count(&self) -> usize {
        self.tables.lock().await.events.len()
    }

    /// Returns a copy of every outbox row, processed or not.
    pub async fn outbox_entries(&self) -> Vec<OutboxEntry> {
        self.tables.lock().await.outbox.clone()
    }

    /// Clears all tables.
    pub async fn clear(&self) {
        let mut tables = self.tables.lock().await;
        tables.aggregates.clear();
        tables.events.clear();
        tables.outbox.clear();
    }
}

#[async_trait]
impl WriteStore for InMemoryStore {
    async fn commit(&self, work: UnitOfWork) -> Result<Version> {
        work.validate()?;
        self.faults.check_available()?;

        let mut tables = self.tables.lock().await;
        let aggregate_id = work.aggregate_id().clone();

        let actual = tables
            .aggregates
            .get(&aggregate_id)
            .map(|record| record.version)
            .unwrap_or(Version::initial());
        if actual != work.expected_version {
            return Err(StoreError::ConcurrencyConflict {
                aggregate_id,
                expected: work.expected_version,
                actual,
            });
        }

        // Unique (aggregate_id, version) on the log.
        if let Some(clash) = work.events.iter().find(|new| {
            tables
                .events
                .iter()
                .any(|e| e.aggregate_id == new.aggregate_id && e.version == new.version)
        }) {
            return Err(StoreError::ConcurrencyConflict {
                aggregate_id,
                expected: work.expected_version,
                actual: clash.version,
            });
        }

        if self.faults.fail_event_log.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "event log write failed".to_string(),
            ));
        }
        if self.faults.fail_outbox.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("outbox write failed".to_string()));
        }

        let new_version = work.aggregate.version;
        tables.aggregates.insert(aggregate_id, work.aggregate);
        tables.events.extend(work.events);
        tables.outbox.extend(work.outbox);

        Ok(new_version)
    }

    async fn load_aggregate(
        &self,
        aggregate_id: &AggregateId,
    ) -> Result<Option<AggregateRecord>> {
        self.faults.check_available()?;
        Ok(self.tables.lock().await.aggregates.get(aggregate_id).cloned())
    }

    async fn events_for_aggregate(&self, aggregate_id: &AggregateId) -> Result<Vec<EventRecord>> {
        self.faults.check_available()?;
        let tables = self.tables.lock().await;
        let mut events: Vec<_> = tables
            .events
            .iter()
            .filter(|e| &e.aggregate_id == aggregate_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.version);
        Ok(events)
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        self.faults.check_available()?;
        let events = self.tables.lock().await.events.clone();
        Ok(Box::pin(futures_util::stream::iter(events.into_iter().map(Ok))))
    }
}

#[async_trait]
impl OutboxStore for InMemoryStore {
    async fn fetch_unprocessed(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        self.faults.check_available()?;
        let tables = self.tables.lock().await;
        let mut pending: Vec<_> = tables
            .outbox
            .iter()
            .filter(|entry| !entry.processed)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps.
        pending.sort_by_key(|entry| entry.created_at);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn mark_processed(&self, id: OutboxId) -> Result<()> {
        self.faults.check_available()?;
        if self.faults.take_mark_failure() {
            return Err(StoreError::Unavailable(
                "mark_processed write failed".to_string(),
            ));
        }

        let mut tables = self.tables.lock().await;
        let entry = tables
            .outbox
            .iter_mut()
            .find(|entry| entry.id == id)
            .ok_or(StoreError::OutboxEntryNotFound(id))?;
        entry.processed = true;
        entry.processed_at = Some(Utc::now());
        Ok(())
    }

    async fn pending_count(&self) -> Result<u64> {
        self.faults.check_available()?;
        let tables = self.tables.lock().await;
        Ok(tables.outbox.iter().filter(|e| !e.processed).count() as u64)
    }

    async fn purge_processed(&self, older_than: DateTime<Utc>) -> Result<u64> {
        self.faults.check_available()?;
        let mut tables = self.tables.lock().await;
        let before = tables.outbox.len();
        tables.outbox.retain(|entry| {
            !(entry.processed && entry.processed_at.is_some_and(|at| at < older_than))
        });
        Ok((before - tables.outbox.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &AggregateId, version: i64, event_type: &str) -> EventRecord {
        EventRecord::builder()
            .aggregate_id(id.clone())
            .aggregate_type("Order")
            .event_type(event_type)
            .version(Version::new(version))
            .event_data_raw(serde_json::json!({ "event_type": event_type }))
            .build()
    }

    fn work(id: &AggregateId, expected: i64, types: &[&str]) -> UnitOfWork {
        let events: Vec<_> = types
            .iter()
            .enumerate()
            .map(|(i, t)| event(id, expected + 1 + i as i64, t))
            .collect();
        let version = Version::new(expected + types.len() as i64);
        let aggregate = AggregateRecord::from_state(
            id.clone(),
            "Order",
            version,
            &serde_json::json!({ "version": version }),
        )
        .unwrap();
        UnitOfWork::new(aggregate, Version::new(expected), events)
    }

    async fn version_of(store: &InMemoryStore, id: &AggregateId) -> Option<Version> {
        store.load_aggregate(id).await.unwrap().map(|record| record.version)
    }

    #[tokio::test]
    async fn commit_writes_all_three_tables() {
        let store = InMemoryStore::new();
        let id = AggregateId::new();

        let version = store
            .commit(work(&id, 0, &["OrderCreated", "OrderItemAdded"]))
            .await
            .unwrap();

        assert_eq!(version, Version::new(2));
        assert_eq!(version_of(&store, &id).await, Some(Version::new(2)));
        assert_eq!(store.events_for_aggregate(&id).await.unwrap().len(), 2);
        assert_eq!(store.outbox_entries().await.len(), 2);
    }

    #[tokio::test]
    async fn stale_expected_version_is_a_conflict() {
        let store = InMemoryStore::new();
        let id = AggregateId::new();
        store.commit(work(&id, 0, &["OrderCreated"])).await.unwrap();

        let result = store.commit(work(&id, 0, &["OrderCreated"])).await;

        assert!(matches!(
            result,
            Err(StoreError::ConcurrencyConflict { actual, .. }) if actual == Version::new(1)
        ));
        assert_eq!(store.event_count().await, 1);
        assert_eq!(store.outbox_entries().await.len(), 1);
    }

    #[tokio::test]
    async fn outbox_failure_rolls_back_everything() {
        let store = InMemoryStore::new();
        let id = AggregateId::new();
        store.faults().fail_outbox_writes(true);

        let result = store.commit(work(&id, 0, &["OrderCreated"])).await;

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert!(store.load_aggregate(&id).await.unwrap().is_none());
        assert_eq!(store.event_count().await, 0);
        assert!(store.outbox_entries().await.is_empty());
    }

    #[tokio::test]
    async fn event_log_failure_rolls_back_everything() {
        let store = InMemoryStore::new();
        let id = AggregateId::new();
        store.commit(work(&id, 0, &["OrderCreated"])).await.unwrap();
        store.faults().fail_event_log_writes(true);

        let result = store.commit(work(&id, 1, &["OrderConfirmed"])).await;

        assert!(result.is_err());
        assert_eq!(version_of(&store, &id).await, Some(Version::first()));
        assert_eq!(store.outbox_entries().await.len(), 1);
    }

    #[tokio::test]
    async fn fetch_unprocessed_is_ordered_and_bounded() {
        let store = InMemoryStore::new();
        let a = AggregateId::new();
        let b = AggregateId::new();
        store
            .commit(work(&a, 0, &["OrderCreated", "OrderItemAdded"]))
            .await
            .unwrap();
        store.commit(work(&b, 0, &["OrderCreated"])).await.unwrap();

        let batch = store.fetch_unprocessed(2).await.unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].aggregate_id, a);
        assert_eq!(batch[0].event_type, "OrderCreated");
        assert_eq!(batch[1].event_type, "OrderItemAdded");
    }

    #[tokio::test]
    async fn mark_processed_hides_entry() {
        let store = InMemoryStore::new();
        let id = AggregateId::new();
        store.commit(work(&id, 0, &["OrderCreated"])).await.unwrap();
        let entry = store.fetch_unprocessed(10).await.unwrap().remove(0);

        store.mark_processed(entry.id).await.unwrap();

        assert!(store.fetch_unprocessed(10).await.unwrap().is_empty());
        assert_eq!(store.pending_count().await.unwrap(), 0);
        let stored = store.outbox_entries().await.remove(0);
        assert!(stored.processed);
        assert!(stored.processed_at.is_some());
    }

    #[tokio::test]
    async fn mark_processed_unknown_id_fails() {
        let store = InMemoryStore::new();
        let result = store.mark_processed(OutboxId::new()).await;
        assert!(matches!(result, Err(StoreError::OutboxEntryNotFound(_))));
    }

    #[tokio::test]
    async fn injected_mark_failures_are_consumed() {
        let store = InMemoryStore::new();
        let id = AggregateId::new();
        store.commit(work(&id, 0, &["OrderCreated"])).await.unwrap();
        let entry = store.fetch_unprocessed(10).await.unwrap().remove(0);
        store.faults().fail_next_marks(1);

        assert!(store.mark_processed(entry.id).await.is_err());
        assert!(store.mark_processed(entry.id).await.is_ok());
    }

    #[tokio::test]
    async fn purge_removes_only_old_processed_entries() {
        let store = InMemoryStore::new();
        let id = AggregateId::new();
        store
            .commit(work(&id, 0, &["OrderCreated", "OrderConfirmed"]))
            .await
            .unwrap();
        let first = store.fetch_unprocessed(1).await.unwrap().remove(0);
        store.mark_processed(first.id).await.unwrap();

        let removed = store
            .purge_processed(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();

        assert_eq!(removed, 1);
        let remaining = store.outbox_entries().await;
        assert_eq!(remaining.len(), 1);
        assert!(!remaining[0].processed);
    }

    #[tokio::test]
    async fn unavailable_store_rejects_reads_and_writes() {
        let store = InMemoryStore::new();
        store.faults().set_unavailable(true);
        let id = AggregateId::new();

        assert!(store.commit(work(&id, 0, &["OrderCreated"])).await.is_err());
        assert!(store.load_aggregate(&id).await.is_err());
        assert!(store.fetch_unprocessed(10).await.is_err());
    }

    #[tokio::test]
    async fn stream_all_events_yields_log_in_commit_order() {
        use futures_util::StreamExt;

        let store = InMemoryStore::new();
        let a = AggregateId::new();
        let b = AggregateId::new();
        store.commit(work(&a, 0, &["OrderCreated"])).await.unwrap();
        store.commit(work(&b, 0, &["OrderCreated"])).await.unwrap();

        let collected: Vec<_> = store.stream_all_events().await.unwrap().collect().await;

        assert_eq!(collected.len(), 2);
        assert_eq!(collected[0].as_ref().unwrap().aggregate_id, a);
        assert_eq!(collected[1].as_ref().unwrap().aggregate_id, b);
    }
}
