use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use common::AggregateId;
use domain::{CustomerId, Money, OrderStatus};
use sqlx::{PgPool, Row, postgres::PgRow};
use write_store::Version;

use crate::read_model::{AnalyticsPeriod, ListOrders, OrderAnalytics, OrderReadModel, ReadModelStore};
use crate::{ProjectionError, Result};

const COLUMNS: &str = "id, customer_id, status, total_amount, currency, shipping_address, items, \
                       created_at, updated_at, last_applied_version";

/// PostgreSQL-backed read model store.
#[derive(Clone)]
pub struct PostgresReadModelStore {
    pool: PgPool,
}

impl PostgresReadModelStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the `order_read_models` table.
    pub async fn run_migrations(&self) -> Result<()> {
        let mut migrator = sqlx::migrate!("./migrations");
        migrator.set_ignore_missing(true);
        migrator.run(&self.pool).await?;
        Ok(())
    }

    fn row_to_record(row: PgRow) -> Result<OrderReadModel> {
        let status: String = row.try_get("status")?;
        let status = status
            .parse::<OrderStatus>()
            .map_err(|e| ProjectionError::Storage(sqlx::Error::Decode(Box::new(e))))?;

        Ok(OrderReadModel {
            id: AggregateId::from_string(row.try_get::<String, _>("id")?),
            customer_id: CustomerId::new(row.try_get::<String, _>("customer_id")?),
            status,
            total_amount: Money::new(
                row.try_get::<i64, _>("total_amount")?,
                row.try_get::<String, _>("currency")?,
            ),
            shipping_address: serde_json::from_value(row.try_get("shipping_address")?)?,
            items: serde_json::from_value(row.try_get("items")?)?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            last_applied_version: Version::new(row.try_get("last_applied_version")?),
        })
    }
}

#[async_trait]
impl ReadModelStore for PostgresReadModelStore {
    async fn get(&self, id: &AggregateId) -> Result<Option<OrderReadModel>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM order_read_models WHERE id = $1"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn upsert(&self, record: &OrderReadModel) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO order_read_models
                (id, customer_id, status, total_amount, currency, shipping_address, items,
                 created_at, updated_at, last_applied_version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                customer_id = EXCLUDED.customer_id,
                status = EXCLUDED.status,
                total_amount = EXCLUDED.total_amount,
                currency = EXCLUDED.currency,
                shipping_address = EXCLUDED.shipping_address,
                items = EXCLUDED.items,
                updated_at = EXCLUDED.updated_at,
                last_applied_version = EXCLUDED.last_applied_version
            WHERE order_read_models.last_applied_version <= EXCLUDED.last_applied_version
            "#,
        )
        .bind(record.id.as_str())
        .bind(record.customer_id.as_str())
        .bind(record.status.as_str())
        .bind(record.total_amount.amount)
        .bind(&record.total_amount.currency)
        .bind(serde_json::to_value(&record.shipping_address)?)
        .bind(serde_json::to_value(&record.items)?)
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(record.last_applied_version.as_i64())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: &AggregateId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM order_read_models WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, query: &ListOrders) -> Result<Vec<OrderReadModel>> {
        let rows = match &query.customer_id {
            Some(customer_id) => {
                sqlx::query(&format!(
                    "SELECT {COLUMNS} FROM order_read_models WHERE customer_id = $1 \
                     ORDER BY created_at DESC, id ASC LIMIT $2 OFFSET $3"
                ))
                .bind(customer_id.as_str())
                .bind(query.limit)
                .bind(query.offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {COLUMNS} FROM order_read_models \
                     ORDER BY created_at DESC, id ASC LIMIT $1 OFFSET $2"
                ))
                .bind(query.limit)
                .bind(query.offset)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn analytics(&self, period: AnalyticsPeriod) -> Result<OrderAnalytics> {
        let since = period.since(Utc::now());

        let totals = sqlx::query(
            r#"
            SELECT COUNT(*) AS total_orders,
                   COALESCE(SUM(total_amount), 0)::BIGINT AS total_revenue
            FROM order_read_models
            WHERE $1::TIMESTAMPTZ IS NULL OR created_at >= $1
            "#,
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        let by_status = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS orders
            FROM order_read_models
            WHERE $1::TIMESTAMPTZ IS NULL OR created_at >= $1
            GROUP BY status
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let total_orders: i64 = totals.try_get("total_orders")?;
        let total_revenue: i64 = totals.try_get("total_revenue")?;
        let mut orders_by_status = BTreeMap::new();
        for row in by_status {
            orders_by_status.insert(
                row.try_get::<String, _>("status")?,
                row.try_get::<i64, _>("orders")?,
            );
        }

        Ok(OrderAnalytics {
            total_orders,
            total_revenue,
            average_order_value: if total_orders > 0 {
                total_revenue / total_orders
            } else {
                0
            },
            orders_by_status,
        })
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("TRUNCATE TABLE order_read_models")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
