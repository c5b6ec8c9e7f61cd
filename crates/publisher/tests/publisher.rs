//! Outbox publisher behaviour against the in-memory store and bus.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::AggregateId;
use domain::{Address, ConfirmOrder, CreateOrder, CustomerId, Money, OrderItem, OrderService};
use event_bus::{
    Ack, EventBus, EventBusError, EventMessage, InMemoryEventBus, Subscription, AGGREGATE_ID_HEADER,
};
use publisher::{DrainReport, OutboxPublisher, PublisherConfig};
use tokio::sync::watch;
use write_store::{InMemoryStore, OutboxStore};

const TOPIC: &str = "orders";

fn create_cmd(order_id: &str) -> CreateOrder {
    CreateOrder::new(
        AggregateId::from(order_id),
        CustomerId::new("cust-1"),
        vec![OrderItem::new("SKU-001", 1, Money::usd(1000))],
        Address::new("1 Main St", "Springfield", "IL", "62701", "US"),
    )
}

async fn seed(store: &InMemoryStore, orders: &[&str]) {
    let service = OrderService::new(store.clone());
    for id in orders {
        service.create_order(create_cmd(id)).await.unwrap();
        service
            .confirm_order(ConfirmOrder::new(AggregateId::from(*id)))
            .await
            .unwrap();
    }
}

fn publisher(
    store: &InMemoryStore,
    bus: &InMemoryEventBus,
) -> OutboxPublisher<InMemoryStore, InMemoryEventBus> {
    OutboxPublisher::new(store.clone(), bus.clone(), PublisherConfig::default())
}

/// A bus that never answers within any sane timeout.
struct StalledBus;

#[async_trait]
impl EventBus for StalledBus {
    async fn publish(&self, _topic: &str, _message: EventMessage) -> event_bus::Result<Ack> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(EventBusError::Unavailable("stalled".to_string()))
    }

    async fn subscribe(
        &self,
        topic: &str,
        _group: &str,
    ) -> event_bus::Result<Box<dyn Subscription>> {
        Err(EventBusError::SubscriptionFailed {
            topic: topic.to_string(),
            reason: "not supported".to_string(),
        })
    }
}

#[tokio::test]
async fn drain_publishes_in_order_and_marks_processed() {
    let store = InMemoryStore::new();
    let bus = InMemoryEventBus::new();
    seed(&store, &["order-1", "order-2"]).await;

    let report = publisher(&store, &bus).drain_once().await.unwrap();

    assert_eq!(
        report,
        DrainReport {
            fetched: 4,
            published: 4,
            failed: 0,
            unmarked: 0,
        }
    );
    assert_eq!(store.pending_count().await.unwrap(), 0);

    let types: Vec<_> = bus
        .messages_for_key(TOPIC, "order-1")
        .iter()
        .map(|m| m.event_type().unwrap_or_default().to_string())
        .collect();
    assert_eq!(types, vec!["OrderCreated", "OrderConfirmed"]);

    let messages = bus.messages(TOPIC);
    assert_eq!(messages.len(), 4);
    assert!(
        messages
            .iter()
            .all(|m| m.header(AGGREGATE_ID_HEADER) == Some(m.key.as_str()))
    );
}

#[tokio::test]
async fn batch_size_bounds_each_cycle() {
    let store = InMemoryStore::new();
    let bus = InMemoryEventBus::new();
    seed(&store, &["order-1", "order-2"]).await;

    let publisher = OutboxPublisher::new(
        store.clone(),
        bus.clone(),
        PublisherConfig::default().batch_size(3),
    );

    assert_eq!(publisher.drain_once().await.unwrap().published, 3);
    assert_eq!(publisher.drain_once().await.unwrap().published, 1);
    assert!(publisher.drain_once().await.unwrap().is_idle());
}

#[tokio::test]
async fn unavailable_bus_leaves_entries_for_next_cycle() {
    let store = InMemoryStore::new();
    let bus = InMemoryEventBus::new();
    seed(&store, &["order-1"]).await;
    let publisher = publisher(&store, &bus);

    bus.set_available(false);
    let report = publisher.drain_once().await.unwrap();

    assert_eq!(report.fetched, 2);
    assert_eq!(report.published, 0);
    assert_eq!(report.failed, 1);
    assert_eq!(store.pending_count().await.unwrap(), 2);

    bus.set_available(true);
    let report = publisher.drain_once().await.unwrap();
    assert_eq!(report.published, 2);
    assert_eq!(store.pending_count().await.unwrap(), 0);
    assert_eq!(bus.messages(TOPIC).len(), 2);
}

#[tokio::test]
async fn failed_mark_after_ack_redelivers_once() {
    let store = InMemoryStore::new();
    let bus = InMemoryEventBus::new();
    let service = OrderService::new(store.clone());
    service.create_order(create_cmd("order-1")).await.unwrap();
    let publisher = publisher(&store, &bus);

    // Ack arrives, then the publisher "crashes" before the mark lands.
    store.faults().fail_next_marks(1);
    let report = publisher.drain_once().await.unwrap();
    assert_eq!(report.published, 1);
    assert_eq!(report.unmarked, 1);
    assert_eq!(store.pending_count().await.unwrap(), 1);

    let report = publisher.drain_once().await.unwrap();
    assert_eq!(report.published, 1);
    assert_eq!(report.unmarked, 0);
    assert_eq!(store.pending_count().await.unwrap(), 0);

    let delivered = bus.messages_for_key(TOPIC, "order-1");
    assert_eq!(delivered.len(), 2);
    assert_eq!(delivered[0].payload, delivered[1].payload);
}

#[tokio::test(start_paused = true)]
async fn publish_timeout_is_honoured() {
    let store = InMemoryStore::new();
    seed(&store, &["order-1"]).await;

    let publisher = OutboxPublisher::new(
        store.clone(),
        StalledBus,
        PublisherConfig::default().publish_timeout(Duration::from_millis(250)),
    );

    let report = publisher.drain_once().await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.published, 0);
    assert_eq!(store.pending_count().await.unwrap(), 2);
}

#[tokio::test]
async fn unavailable_store_fails_the_cycle() {
    let store = InMemoryStore::new();
    let bus = InMemoryEventBus::new();
    seed(&store, &["order-1"]).await;

    store.faults().set_unavailable(true);
    assert!(publisher(&store, &bus).drain_once().await.is_err());
    assert!(bus.messages(TOPIC).is_empty());
}

#[tokio::test]
async fn retention_sweep_removes_processed_entries() {
    let store = InMemoryStore::new();
    let bus = InMemoryEventBus::new();
    seed(&store, &["order-1"]).await;

    let publisher = OutboxPublisher::new(
        store.clone(),
        bus.clone(),
        PublisherConfig::default().retention(chrono::Duration::zero()),
    );
    publisher.drain_once().await.unwrap();

    // The first cycle's sweep ran in the same instant as the marks.
    tokio::time::sleep(Duration::from_millis(5)).await;
    publisher.drain_once().await.unwrap();
    assert!(store.outbox_entries().await.is_empty());
}

async fn wait_for_messages(bus: &InMemoryEventBus, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while bus.messages(TOPIC).len() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn run_loop_drains_on_trigger_and_stops_on_shutdown() {
    let store = InMemoryStore::new();
    let bus = InMemoryEventBus::new();
    seed(&store, &["order-1"]).await;

    let publisher = Arc::new(OutboxPublisher::new(
        store.clone(),
        bus.clone(),
        PublisherConfig::default().poll_interval(Duration::from_secs(3600)),
    ));
    let trigger = publisher.trigger();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = Arc::clone(&publisher).spawn(shutdown_rx);

    // The first tick fires immediately.
    wait_for_messages(&bus, 2).await;

    seed(&store, &["order-2"]).await;
    trigger.drain_now();
    wait_for_messages(&bus, 4).await;

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(store.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn run_loop_survives_zero_poll_interval() {
    let store = InMemoryStore::new();
    let bus = InMemoryEventBus::new();
    seed(&store, &["order-1"]).await;

    let config = PublisherConfig {
        poll_interval: Duration::ZERO,
        ..PublisherConfig::default()
    };
    let publisher = Arc::new(OutboxPublisher::new(store.clone(), bus.clone(), config));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = Arc::clone(&publisher).spawn(shutdown_rx);

    wait_for_messages(&bus, 2).await;

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(store.pending_count().await.unwrap(), 0);
}
