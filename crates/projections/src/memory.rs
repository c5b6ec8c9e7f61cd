//! In-memory read model store for tests and single-process runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use common::AggregateId;
use tokio::sync::RwLock;

use crate::read_model::{AnalyticsPeriod, ListOrders, OrderAnalytics, OrderReadModel, ReadModelStore};
use crate::{ProjectionError, Result};

/// Read model store backed by a `HashMap`.
#[derive(Clone, Default)]
pub struct InMemoryReadModelStore {
    records: Arc<RwLock<HashMap<AggregateId, OrderReadModel>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryReadModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every operation fails with `Unavailable`.
    pub fn set_unavailable(&self, value: bool) {
        self.unavailable.store(value, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ProjectionError::Unavailable(
                "in-memory read model offline".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ReadModelStore for InMemoryReadModelStore {
    async fn get(&self, id: &AggregateId) -> Result<Option<OrderReadModel>> {
        self.check_available()?;
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn upsert(&self, record: &OrderReadModel) -> Result<bool> {
        self.check_available()?;
        let mut records = self.records.write().await;
        if let Some(existing) = records.get(&record.id)
            && existing.last_applied_version > record.last_applied_version
        {
            return Ok(false);
        }
        records.insert(record.id.clone(), record.clone());
        Ok(true)
    }

    async fn delete(&self, id: &AggregateId) -> Result<bool> {
        self.check_available()?;
        Ok(self.records.write().await.remove(id).is_some())
    }

    async fn list(&self, query: &ListOrders) -> Result<Vec<OrderReadModel>> {
        self.check_available()?;
        let records = self.records.read().await;
        let mut matching: Vec<_> = records.values().filter(|r| query.matches(r)).collect();
        matching.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        Ok(matching
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .cloned()
            .collect())
    }

    async fn analytics(&self, period: AnalyticsPeriod) -> Result<OrderAnalytics> {
        self.check_available()?;
        let since = period.since(Utc::now());
        let records = self.records.read().await;
        Ok(OrderAnalytics::from_records(
            records
                .values()
                .filter(|r| since.is_none_or(|since| r.created_at >= since)),
        ))
    }

    async fn clear(&self) -> Result<()> {
        self.check_available()?;
        self.records.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration};
    use domain::{Address, CustomerId, Money, OrderStatus};
    use write_store::Version;

    fn record(id: &str, customer: &str, created_at: DateTime<Utc>) -> OrderReadModel {
        OrderReadModel {
            id: AggregateId::from(id),
            customer_id: CustomerId::new(customer),
            status: OrderStatus::Draft,
            total_amount: Money::usd(1000),
            shipping_address: Address::new("1 Main St", "Springfield", "IL", "62701", "US"),
            items: vec![],
            created_at,
            updated_at: created_at,
            last_applied_version: Version::first(),
        }
    }

    #[tokio::test]
    async fn upsert_never_moves_backwards() {
        let store = InMemoryReadModelStore::new();
        let mut newer = record("o-1", "c-1", Utc::now());
        newer.last_applied_version = Version::new(3);
        newer.status = OrderStatus::Confirmed;
        assert!(store.upsert(&newer).await.unwrap());

        let older = record("o-1", "c-1", Utc::now());
        assert!(!store.upsert(&older).await.unwrap());

        let stored = store.get(&AggregateId::from("o-1")).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Confirmed);
    }

    #[tokio::test]
    async fn list_is_newest_first_and_paginated() {
        let store = InMemoryReadModelStore::new();
        let now = Utc::now();
        for i in 0..5 {
            store
                .upsert(&record(&format!("o-{i}"), "c-1", now - Duration::minutes(i)))
                .await
                .unwrap();
        }
        store.upsert(&record("other", "c-2", now)).await.unwrap();

        let page = store
            .list(
                &ListOrders::for_customer(CustomerId::new("c-1"))
                    .limit(2)
                    .offset(1),
            )
            .await
            .unwrap();
        let ids: Vec<_> = page.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["o-1", "o-2"]);

        let all = store.list(&ListOrders::default()).await.unwrap();
        assert_eq!(all.len(), 6);
    }

    #[tokio::test]
    async fn analytics_respects_period() {
        let store = InMemoryReadModelStore::new();
        let now = Utc::now();
        store.upsert(&record("recent", "c-1", now)).await.unwrap();
        store
            .upsert(&record("old", "c-1", now - Duration::days(45)))
            .await
            .unwrap();

        let monthly = store.analytics(AnalyticsPeriod::Monthly).await.unwrap();
        let all = store.analytics(AnalyticsPeriod::All).await.unwrap();

        assert_eq!(monthly.total_orders, 1);
        assert_eq!(all.total_orders, 2);
        assert_eq!(all.total_revenue, 2000);
    }

    #[tokio::test]
    async fn unavailable_store_fails_retryably() {
        let store = InMemoryReadModelStore::new();
        store.set_unavailable(true);

        let err = store.get(&AggregateId::from("o-1")).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
