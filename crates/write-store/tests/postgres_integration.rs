//! PostgreSQL integration tests for the write store.
//!
//! A single container is shared by every test in this binary; tests truncate
//! the tables they touch and run serially.
//!
//! ```bash
//! cargo test -p write-store --test postgres_integration
//! ```

use std::sync::Arc;

use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use write_store::{
    AggregateId, AggregateRecord, EventRecord, OutboxStore, PostgresStore,
    StoreError, UnitOfWork, Version, WriteStore,
};

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!("../migrations/001_create_write_side.sql"))
                .execute(&temp_pool)
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_store() -> PostgresStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE aggregates, events, outbox_events")
        .execute(&pool)
        .await
        .unwrap();

    PostgresStore::new(pool)
}

fn work(id: &AggregateId, expected: i64, types: &[&str]) -> UnitOfWork {
    let events: Vec<EventRecord> = types
        .iter()
        .enumerate()
        .map(|(i, t)| {
            EventRecord::builder()
                .aggregate_id(id.clone())
                .aggregate_type("Order")
                .event_type(*t)
                .version(Version::new(expected + 1 + i as i64))
                .event_data_raw(serde_json::json!({ "event_type": t, "aggregate_id": id }))
                .build()
        })
        .collect();
    let version = Version::new(expected + types.len() as i64);
    let aggregate =
        AggregateRecord::from_state(id.clone(), "Order", version, &serde_json::json!({"v": version}))
            .unwrap();
    UnitOfWork::new(aggregate, Version::new(expected), events)
}

#[tokio::test]
#[serial]
async fn commit_persists_aggregate_log_and_outbox() {
    let store = get_test_store().await;
    let id = AggregateId::new();

    let version = store
        .commit(work(&id, 0, &["OrderCreated", "OrderItemAdded"]))
        .await
        .unwrap();

    assert_eq!(version, Version::new(2));
    let record = store.load_aggregate(&id).await.unwrap().unwrap();
    assert_eq!(record.version, Version::new(2));
    assert_eq!(record.state["v"], 2);

    let events = store.events_for_aggregate(&id).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].event_type, "OrderItemAdded");

    let outbox = store.fetch_unprocessed(10).await.unwrap();
    assert_eq!(outbox.len(), 2);
    assert_eq!(outbox[0].event_type, "OrderCreated");
    assert_eq!(outbox[0].aggregate_id, id);
}

#[tokio::test]
#[serial]
async fn stale_version_conflicts_and_writes_nothing() {
    let store = get_test_store().await;
    let id = AggregateId::new();
    store.commit(work(&id, 0, &["OrderCreated"])).await.unwrap();
    store.commit(work(&id, 1, &["OrderConfirmed"])).await.unwrap();

    let result = store.commit(work(&id, 1, &["OrderCancelled"])).await;

    assert!(matches!(
        result,
        Err(StoreError::ConcurrencyConflict { actual, .. }) if actual == Version::new(2)
    ));
    assert_eq!(store.events_for_aggregate(&id).await.unwrap().len(), 2);
    assert_eq!(store.pending_count().await.unwrap(), 2);
}

#[tokio::test]
#[serial]
async fn concurrent_creates_admit_one_winner() {
    let store = get_test_store().await;
    let id = AggregateId::new();

    let (a, b) = tokio::join!(
        store.commit(work(&id, 0, &["OrderCreated"])),
        store.commit(work(&id, 0, &["OrderCreated"])),
    );

    assert!(a.is_ok() ^ b.is_ok());
    let record = store.load_aggregate(&id).await.unwrap().unwrap();
    assert_eq!(record.version, Version::first());
    assert_eq!(store.pending_count().await.unwrap(), 1);
}

#[tokio::test]
#[serial]
async fn mark_processed_and_purge() {
    let store = get_test_store().await;
    let id = AggregateId::new();
    store
        .commit(work(&id, 0, &["OrderCreated", "OrderConfirmed"]))
        .await
        .unwrap();

    let first = store.fetch_unprocessed(1).await.unwrap().remove(0);
    store.mark_processed(first.id).await.unwrap();

    let rest = store.fetch_unprocessed(10).await.unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].event_type, "OrderConfirmed");

    let purged = store
        .purge_processed(chrono::Utc::now() + chrono::Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(purged, 1);
    assert_eq!(store.pending_count().await.unwrap(), 1);
}

#[tokio::test]
#[serial]
async fn mark_processed_unknown_entry_fails() {
    let store = get_test_store().await;
    let result = store
        .mark_processed(write_store::OutboxId::new())
        .await;
    assert!(matches!(result, Err(StoreError::OutboxEntryNotFound(_))));
}

#[tokio::test]
#[serial]
async fn stream_all_events_in_commit_order() {
    use futures_util::StreamExt;

    let store = get_test_store().await;
    let a = AggregateId::new();
    let b = AggregateId::new();
    store.commit(work(&a, 0, &["OrderCreated"])).await.unwrap();
    store.commit(work(&b, 0, &["OrderCreated"])).await.unwrap();
    store.commit(work(&a, 1, &["OrderConfirmed"])).await.unwrap();

    let events: Vec<_> = store
        .stream_all_events()
        .await
        .unwrap()
        .map(|r| r.unwrap())
        .collect()
        .await;

    let order: Vec<_> = events
        .iter()
        .map(|e| (e.aggregate_id.clone(), e.version.as_i64()))
        .collect();
    assert_eq!(order, vec![(a.clone(), 1), (b, 1), (a, 2)]);
}
