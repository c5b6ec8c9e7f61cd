//! The order read model and the store it lives in.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::AggregateId;
use domain::{Address, CustomerId, Money, OrderError, OrderItem, OrderStatus, order_total};
use serde::{Deserialize, Serialize};
use write_store::Version;

use crate::Result;

/// Denormalized view of one order, as served to readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderReadModel {
    pub id: AggregateId,
    pub customer_id: CustomerId,
    pub status: OrderStatus,
    pub total_amount: Money,
    pub shipping_address: Address,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Version of the last event folded into this record.
    pub last_applied_version: Version,
}

impl OrderReadModel {
    /// Recomputes `total_amount` from the item list, keeping the currency.
    pub fn recompute_total(&mut self) -> std::result::Result<(), OrderError> {
        self.total_amount = order_total(&self.items, &self.total_amount.currency)?;
        Ok(())
    }

    /// Marks `version` as applied at `at`.
    pub fn advance(&mut self, version: Version, at: DateTime<Utc>) {
        self.last_applied_version = version;
        self.updated_at = at;
    }
}

/// Time window for analytics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyticsPeriod {
    /// Since midnight UTC today.
    Daily,
    /// The last 7 days, counted from midnight UTC today.
    Weekly,
    /// The last 30 days, counted from midnight UTC today.
    #[default]
    Monthly,
    All,
}

impl AnalyticsPeriod {
    /// Earliest `created_at` included in the window, or None for all time.
    pub fn since(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let midnight = now.date_naive().and_hms_opt(0, 0, 0)?.and_utc();
        match self {
            AnalyticsPeriod::Daily => Some(midnight),
            AnalyticsPeriod::Weekly => Some(midnight - Duration::days(7)),
            AnalyticsPeriod::Monthly => Some(midnight - Duration::days(30)),
            AnalyticsPeriod::All => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalyticsPeriod::Daily => "daily",
            AnalyticsPeriod::Weekly => "weekly",
            AnalyticsPeriod::Monthly => "monthly",
            AnalyticsPeriod::All => "all",
        }
    }
}

impl std::fmt::Display for AnalyticsPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a period name is not one of daily, weekly, monthly or all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid period {0:?}: must be one of daily, weekly, monthly, all")]
pub struct InvalidPeriod(pub String);

impl FromStr for AnalyticsPeriod {
    type Err = InvalidPeriod;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "daily" => Ok(AnalyticsPeriod::Daily),
            "weekly" => Ok(AnalyticsPeriod::Weekly),
            "monthly" => Ok(AnalyticsPeriod::Monthly),
            "all" => Ok(AnalyticsPeriod::All),
            other => Err(InvalidPeriod(other.to_string())),
        }
    }
}

/// Aggregate figures over the orders in a period. Amounts are in minor
/// units.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAnalytics {
    pub total_orders: i64,
    pub total_revenue: i64,
    pub average_order_value: i64,
    pub orders_by_status: BTreeMap<String, i64>,
}

impl OrderAnalytics {
    /// Folds records into analytics. Callers filter by period first.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a OrderReadModel>) -> Self {
        let mut analytics = OrderAnalytics::default();
        for record in records {
            analytics.total_orders += 1;
            analytics.total_revenue = analytics
                .total_revenue
                .saturating_add(record.total_amount.amount);
            *analytics
                .orders_by_status
                .entry(record.status.as_str().to_string())
                .or_default() += 1;
        }
        if analytics.total_orders > 0 {
            analytics.average_order_value = analytics.total_revenue / analytics.total_orders;
        }
        analytics
    }
}

/// Default page size for listings.
pub const DEFAULT_LIST_LIMIT: i64 = 10;

/// A page of orders, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOrders {
    /// Restricts the listing to one customer.
    pub customer_id: Option<CustomerId>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for ListOrders {
    fn default() -> Self {
        Self {
            customer_id: None,
            limit: DEFAULT_LIST_LIMIT,
            offset: 0,
        }
    }
}

impl ListOrders {
    pub fn for_customer(customer_id: CustomerId) -> Self {
        Self {
            customer_id: Some(customer_id),
            ..Self::default()
        }
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = limit.max(0);
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = offset.max(0);
        self
    }

    pub fn matches(&self, record: &OrderReadModel) -> bool {
        self.customer_id
            .as_ref()
            .is_none_or(|customer| &record.customer_id == customer)
    }
}

/// Storage for order read models.
///
/// Written only by the projection handler. Implementations never move a
/// record backwards: an upsert whose `last_applied_version` is lower than
/// the stored one is ignored.
#[async_trait]
pub trait ReadModelStore: Send + Sync {
    async fn get(&self, id: &AggregateId) -> Result<Option<OrderReadModel>>;

    /// Inserts or replaces the record. Returns false if a newer version was
    /// already stored.
    async fn upsert(&self, record: &OrderReadModel) -> Result<bool>;

    /// Returns true if a record was removed.
    async fn delete(&self, id: &AggregateId) -> Result<bool>;

    /// Orders by `created_at` descending.
    async fn list(&self, query: &ListOrders) -> Result<Vec<OrderReadModel>>;

    async fn analytics(&self, period: AnalyticsPeriod) -> Result<OrderAnalytics>;

    /// Removes every record. Used before a rebuild.
    async fn clear(&self) -> Result<()>;
}

#[async_trait]
impl<T: ReadModelStore + ?Sized> ReadModelStore for Arc<T> {
    async fn get(&self, id: &AggregateId) -> Result<Option<OrderReadModel>> {
        (**self).get(id).await
    }

    async fn upsert(&self, record: &OrderReadModel) -> Result<bool> {
        (**self).upsert(record).await
    }

    async fn delete(&self, id: &AggregateId) -> Result<bool> {
        (**self).delete(id).await
    }

    async fn list(&self, query: &ListOrders) -> Result<Vec<OrderReadModel>> {
        (**self).list(query).await
    }

    async fn analytics(&self, period: AnalyticsPeriod) -> Result<OrderAnalytics> {
        (**self).analytics(period).await
    }

    async fn clear(&self) -> Result<()> {
        (**self).clear().await
    }
}
