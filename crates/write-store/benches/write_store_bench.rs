use common::AggregateId;
use criterion::{Criterion, criterion_group, criterion_main};
use write_store::{
    AggregateRecord, EventRecord, InMemoryStore, OutboxStore, UnitOfWork, Version, WriteStore,
};

fn make_work(aggregate_id: &AggregateId, expected: i64, events: i64) -> UnitOfWork {
    let records: Vec<EventRecord> = (1..=events)
        .map(|i| {
            EventRecord::builder()
                .aggregate_id(aggregate_id.clone())
                .aggregate_type("Order")
                .event_type("OrderItemAdded")
                .version(Version::new(expected + i))
                .event_data_raw(serde_json::json!({
                    "event_type": "OrderItemAdded",
                    "aggregate_id": aggregate_id.to_string(),
                    "product_id": format!("SKU-{i}"),
                    "quantity": 1,
                    "price": { "amount": 1000, "currency": "USD" }
                }))
                .build()
        })
        .collect();
    let aggregate = AggregateRecord::from_state(
        aggregate_id.clone(),
        "Order",
        Version::new(expected + events),
        &serde_json::json!({ "items": events }),
    )
    .unwrap();
    UnitOfWork::new(aggregate, Version::new(expected), records)
}

fn bench_commit_single_event(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("write_store/commit_single_event", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryStore::new();
                let id = AggregateId::new();
                store.commit(make_work(&id, 0, 1)).await.unwrap();
            });
        });
    });
}

fn bench_commit_batch_10(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("write_store/commit_batch_10", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryStore::new();
                let id = AggregateId::new();
                store.commit(make_work(&id, 0, 10)).await.unwrap();
            });
        });
    });
}

fn bench_fetch_unprocessed_100(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryStore::new();
    rt.block_on(async {
        for _ in 0..100 {
            let id = AggregateId::new();
            store.commit(make_work(&id, 0, 3)).await.unwrap();
        }
    });

    c.bench_function("write_store/fetch_unprocessed_100", |b| {
        b.iter(|| {
            rt.block_on(async {
                let batch = store.fetch_unprocessed(100).await.unwrap();
                assert_eq!(batch.len(), 100);
            });
        });
    });
}

criterion_group!(
    benches,
    bench_commit_single_event,
    bench_commit_batch_10,
    bench_fetch_unprocessed_100,
);
criterion_main!(benches);
