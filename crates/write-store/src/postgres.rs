use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    AggregateId, AggregateRecord, EventId, EventRecord, OutboxEntry, OutboxId,
    OutboxStore, Result, StoreError, Version,
    store::{EventStream, UnitOfWork, WriteStore},
};

/// PostgreSQL-backed write store.
///
/// `commit` runs in one transaction and takes a row lock on the aggregate
/// (`SELECT ... FOR UPDATE`), so concurrent commands against the same order
/// serialize and the loser sees a `ConcurrencyConflict`.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the write-side migrations.
    ///
    /// Migrations owned by other crates may share the database, so versions
    /// this crate does not know about are ignored.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        let mut migrator = sqlx::migrate!("./migrations");
        migrator.set_ignore_missing(true);
        migrator.run(&self.pool).await
    }

    fn row_to_event(row: PgRow) -> Result<EventRecord> {
        Ok(EventRecord {
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            event_type: row.try_get("event_type")?,
            aggregate_id: AggregateId::from_string(row.try_get::<String, _>("aggregate_id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            version: Version::new(row.try_get("version")?),
            occurred_at: row.try_get("occurred_at")?,
            event_data: row.try_get("event_data")?,
        })
    }

    fn row_to_outbox(row: PgRow) -> Result<OutboxEntry> {
        Ok(OutboxEntry {
            id: OutboxId::from_uuid(row.try_get::<Uuid, _>("id")?),
            aggregate_id: AggregateId::from_string(row.try_get::<String, _>("aggregate_id")?),
            event_type: row.try_get("event_type")?,
            event_data: row.try_get("event_data")?,
            created_at: row.try_get("created_at")?,
            processed: row.try_get("processed")?,
            processed_at: row.try_get("processed_at")?,
        })
    }

    fn conflict_or_database(
        err: sqlx::Error,
        constraint: &str,
        aggregate_id: &AggregateId,
        expected: Version,
        actual: Version,
    ) -> StoreError {
        if let sqlx::Error::Database(ref db_err) = err
            && db_err.constraint() == Some(constraint)
        {
            return StoreError::ConcurrencyConflict {
                aggregate_id: aggregate_id.clone(),
                expected,
                actual,
            };
        }
        StoreError::Database(err)
    }

    async fn write_aggregate(
        tx: &mut Transaction<'_, Postgres>,
        record: &AggregateRecord,
        exists: bool,
        expected: Version,
    ) -> Result<()> {
        if exists {
            sqlx::query(
                r#"
                UPDATE aggregates
                SET version = $2, state = $3, updated_at = $4
                WHERE aggregate_id = $1
                "#,
            )
            .bind(record.aggregate_id.as_str())
            .bind(record.version.as_i64())
            .bind(&record.state)
            .bind(record.updated_at)
            .execute(&mut **tx)
            .await?;
        } else {
            sqlx::query(
                r#"
                INSERT INTO aggregates (aggregate_id, aggregate_type, version, state, updated_at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(record.aggregate_id.as_str())
            .bind(&record.aggregate_type)
            .bind(record.version.as_i64())
            .bind(&record.state)
            .bind(record.updated_at)
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                // A concurrent create won the race for the primary key.
                Self::conflict_or_database(
                    e,
                    "aggregates_pkey",
                    &record.aggregate_id,
                    expected,
                    Version::first(),
                )
            })?;
        }
        Ok(())
    }

    async fn insert_event(
        tx: &mut Transaction<'_, Postgres>,
        event: &EventRecord,
        expected: Version,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO events (id, aggregate_id, aggregate_type, event_type, event_data, version, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event.event_id.as_uuid())
        .bind(event.aggregate_id.as_str())
        .bind(&event.aggregate_type)
        .bind(&event.event_type)
        .bind(&event.event_data)
        .bind(event.version.as_i64())
        .bind(event.occurred_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            Self::conflict_or_database(
                e,
                "unique_aggregate_version",
                &event.aggregate_id,
                expected,
                event.version,
            )
        })?;
        Ok(())
    }

    async fn insert_outbox(
        tx: &mut Transaction<'_, Postgres>,
        entry: &OutboxEntry,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO outbox_events (id, aggregate_id, event_type, event_data, created_at, processed, processed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(entry.aggregate_id.as_str())
        .bind(&entry.event_type)
        .bind(&entry.event_data)
        .bind(entry.created_at)
        .bind(entry.processed)
        .bind(entry.processed_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl WriteStore for PostgresStore {
    async fn commit(&self, work: UnitOfWork) -> Result<Version> {
        work.validate()?;
        let aggregate_id = work.aggregate_id().clone();
        let expected = work.expected_version;

        let mut tx = self.pool.begin().await?;

        let current: Option<i64> = sqlx::query_scalar(
            "SELECT version FROM aggregates WHERE aggregate_id = $1 FOR UPDATE",
        )
        .bind(aggregate_id.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let actual = current.map(Version::new).unwrap_or(Version::initial());
        if actual != expected {
            metrics::counter!("write_store_conflicts_total").increment(1);
            return Err(StoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual,
            });
        }

        Self::write_aggregate(&mut tx, &work.aggregate, current.is_some(), expected).await?;
        for event in &work.events {
            Self::insert_event(&mut tx, event, expected).await?;
        }
        for entry in &work.outbox {
            Self::insert_outbox(&mut tx, entry).await?;
        }

        tx.commit().await?;

        metrics::counter!("write_store_commits_total").increment(1);
        tracing::debug!(
            aggregate_id = %aggregate_id,
            version = %work.aggregate.version,
            events = work.events.len(),
            "unit of work committed"
        );

        Ok(work.aggregate.version)
    }

    async fn load_aggregate(
        &self,
        aggregate_id: &AggregateId,
    ) -> Result<Option<AggregateRecord>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT aggregate_id, aggregate_type, version, state, updated_at
            FROM aggregates
            WHERE aggregate_id = $1
            "#,
        )
        .bind(aggregate_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(AggregateRecord {
                aggregate_id: AggregateId::from_string(row.try_get::<String, _>("aggregate_id")?),
                aggregate_type: row.try_get("aggregate_type")?,
                version: Version::new(row.try_get("version")?),
                updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
                state: row.try_get("state")?,
            })),
            None => Ok(None),
        }
    }

    async fn events_for_aggregate(&self, aggregate_id: &AggregateId) -> Result<Vec<EventRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, aggregate_id, aggregate_type, event_type, event_data, version, occurred_at
            FROM events
            WHERE aggregate_id = $1
            ORDER BY version ASC
            "#,
        )
        .bind(aggregate_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        use futures_util::StreamExt;

        let stream = sqlx::query(
            r#"
            SELECT id, aggregate_id, aggregate_type, event_type, event_data, version, occurred_at
            FROM events
            ORDER BY seq ASC
            "#,
        )
        .fetch(&self.pool)
        .map(|result| match result {
            Ok(row) => Self::row_to_event(row),
            Err(e) => Err(StoreError::Database(e)),
        });

        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl OutboxStore for PostgresStore {
    async fn fetch_unprocessed(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, aggregate_id, event_type, event_data, created_at, processed, processed_at
            FROM outbox_events
            WHERE processed = FALSE
            ORDER BY created_at ASC, seq ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_outbox).collect()
    }

    async fn mark_processed(&self, id: OutboxId) -> Result<()> {
        let result = sqlx::query(
            "UPDATE outbox_events SET processed = TRUE, processed_at = NOW() WHERE id = $1",
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OutboxEntryNotFound(id));
        }
        Ok(())
    }

    async fn pending_count(&self) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM outbox_events WHERE processed = FALSE")
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }

    async fn purge_processed(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM outbox_events WHERE processed = TRUE AND processed_at < $1",
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
