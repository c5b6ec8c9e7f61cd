//! End-to-end: commands → outbox → publisher → bus → consumer → read model.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::AggregateId;
use domain::{
    AddItem, Address, CancelOrder, ConfirmOrder, CreateOrder, CustomerId, Money, OrderEvent,
    OrderEventKind, OrderItem, OrderService, OrderStatus, ProductId, RemoveItem,
};
use event_bus::{
    DeliveryOutcome, Delivery, EVENT_TYPE_HEADER, EventBus, EventMessage, HandlerError,
    InMemoryDeadLetterQueue, InMemoryEventBus, MessageHandler, RetryPolicy, deliver,
};
use projections::{
    CachedReadModel, ConsumerConfig, ConsumerHandle, ConsumerState, DEFAULT_GROUP, DEFAULT_TOPIC,
    InMemoryCache, InMemoryReadModelStore, OrderProjection, ProjectionConsumer, ReadModelStore,
};
use publisher::{OutboxPublisher, PublisherConfig};
use tokio::sync::watch;
use write_store::{InMemoryStore, Version};

fn address() -> Address {
    Address::new("1 Main St", "Springfield", "IL", "62701", "US")
}

fn create_cmd(order_id: &str) -> CreateOrder {
    CreateOrder::new(
        AggregateId::from(order_id),
        CustomerId::new("cust-1"),
        vec![
            OrderItem::new("p-1", 2, Money::usd(1000)),
            OrderItem::new("p-2", 1, Money::usd(500)),
        ],
        address(),
    )
}

fn publisher(store: &InMemoryStore, bus: &InMemoryEventBus) -> OutboxPublisher<InMemoryStore, InMemoryEventBus> {
    OutboxPublisher::new(store.clone(), bus.clone(), PublisherConfig::default())
}

fn consumer(
    bus: &InMemoryEventBus,
    handler: Arc<dyn MessageHandler>,
    dead_letters: &InMemoryDeadLetterQueue,
    retry: RetryPolicy,
) -> ProjectionConsumer {
    ProjectionConsumer::new(
        ConsumerConfig::default().retry(retry),
        Arc::new(bus.clone()),
        handler,
        Arc::new(dead_letters.clone()),
    )
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..300 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

async fn stop(shutdown: watch::Sender<bool>, mut handle: ConsumerHandle) {
    shutdown.send(true).unwrap();
    assert!(handle.wait_for(ConsumerState::Stopped).await);
    handle.join().await.unwrap();
}

async fn version_of(store: &impl ReadModelStore, id: &str) -> Option<Version> {
    store
        .get(&AggregateId::from(id))
        .await
        .unwrap()
        .map(|record| record.last_applied_version)
}

#[tokio::test]
async fn order_flows_from_command_to_read_model() {
    let store = InMemoryStore::new();
    let bus = InMemoryEventBus::new();
    let read_models = InMemoryReadModelStore::new();
    let dead_letters = InMemoryDeadLetterQueue::new();
    let service = OrderService::new(store.clone());

    service.create_order(create_cmd("o-1")).await.unwrap();
    service
        .add_item(AddItem::new(
            AggregateId::from("o-1"),
            OrderItem::new("p-3", 4, Money::usd(250)),
        ))
        .await
        .unwrap();
    service
        .confirm_order(ConfirmOrder::new(AggregateId::from("o-1")))
        .await
        .unwrap();

    let report = publisher(&store, &bus).drain_once().await.unwrap();
    assert_eq!(report.published, 3);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = consumer(
        &bus,
        Arc::new(OrderProjection::new(read_models.clone())),
        &dead_letters,
        RetryPolicy::immediate(3),
    )
    .spawn(shutdown_rx);

    eventually(|| async { version_of(&read_models, "o-1").await == Some(Version::new(3)) }).await;
    stop(shutdown_tx, handle).await;

    let record = read_models.get(&AggregateId::from("o-1")).await.unwrap().unwrap();
    assert_eq!(record.status, OrderStatus::Confirmed);
    assert_eq!(record.items.len(), 3);
    assert_eq!(record.total_amount, Money::usd(3500));
    assert!(dead_letters.is_empty().await);
    assert_eq!(bus.lag(DEFAULT_TOPIC, DEFAULT_GROUP), 0);
}

#[tokio::test]
async fn redelivery_after_publisher_crash_matches_single_delivery() {
    let store = InMemoryStore::new();
    let bus = InMemoryEventBus::new();
    let service = OrderService::new(store.clone());

    service.create_order(create_cmd("o-1")).await.unwrap();
    service
        .add_item(AddItem::new(
            AggregateId::from("o-1"),
            OrderItem::new("p-3", 1, Money::usd(100)),
        ))
        .await
        .unwrap();

    // Ack received, mark lost: the Created entry goes out twice.
    store.faults().fail_next_marks(1);
    let publisher = publisher(&store, &bus);
    let first = publisher.drain_once().await.unwrap();
    assert_eq!(first.unmarked, 1);
    let second = publisher.drain_once().await.unwrap();
    assert_eq!(second.published, 1);
    assert_eq!(bus.messages_for_key(DEFAULT_TOPIC, "o-1").len(), 3);

    let once = InMemoryReadModelStore::new();
    let single = OrderProjection::new(once.clone());
    for event in service.history(&AggregateId::from("o-1")).await.unwrap() {
        single.apply(&event).await.unwrap();
    }

    let twice = InMemoryReadModelStore::new();
    let dead_letters = InMemoryDeadLetterQueue::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = consumer(
        &bus,
        Arc::new(OrderProjection::new(twice.clone())),
        &dead_letters,
        RetryPolicy::immediate(3),
    )
    .spawn(shutdown_rx);

    eventually(|| async { bus.lag(DEFAULT_TOPIC, DEFAULT_GROUP) == 0 }).await;
    stop(shutdown_tx, handle).await;

    let id = AggregateId::from("o-1");
    assert_eq!(
        twice.get(&id).await.unwrap(),
        once.get(&id).await.unwrap()
    );
    assert!(dead_letters.is_empty().await);
}

#[tokio::test]
async fn early_event_is_retried_without_corrupting_state() {
    let read_models = InMemoryReadModelStore::new();
    let projection = OrderProjection::new(read_models.clone());
    let dead_letters = InMemoryDeadLetterQueue::new();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let added = OrderEvent::new(
        AggregateId::from("o-1"),
        Version::new(2),
        OrderEventKind::OrderItemAdded {
            product_id: ProductId::new("p-3"),
            quantity: 1,
            price: Money::usd(100),
        },
    );
    let delivery = Delivery {
        topic: DEFAULT_TOPIC.to_string(),
        partition: 0,
        offset: 0,
        message: EventMessage::new("o-1", added.to_json().unwrap())
            .with_header(EVENT_TYPE_HEADER, "OrderItemAdded"),
    };

    let err = projection.handle(&delivery).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(read_models.is_empty().await);

    let outcome = deliver(
        &projection,
        &delivery,
        &RetryPolicy::immediate(3),
        &dead_letters,
        &shutdown_rx,
    )
    .await
    .unwrap();
    assert!(matches!(outcome, DeliveryOutcome::DeadLettered { attempts: 3, .. }));
    assert!(read_models.is_empty().await);

    let command = create_cmd("o-1");
    let created = OrderEvent::new(
        AggregateId::from("o-1"),
        Version::first(),
        OrderEventKind::OrderCreated {
            customer_id: command.customer_id.clone(),
            total_amount: Money::usd(2500),
            items: command.items.clone(),
            shipping_address: command.shipping_address.clone(),
        },
    );
    let created_delivery = Delivery {
        offset: 1,
        message: EventMessage::new("o-1", created.to_json().unwrap())
            .with_header(EVENT_TYPE_HEADER, "OrderCreated"),
        ..delivery.clone()
    };
    let redelivered = Delivery {
        offset: 2,
        ..delivery.clone()
    };

    for next in [&created_delivery, &redelivered] {
        let outcome = deliver(
            &projection,
            next,
            &RetryPolicy::immediate(3),
            &dead_letters,
            &shutdown_rx,
        )
        .await
        .unwrap();
        assert!(matches!(outcome, DeliveryOutcome::Handled { attempts: 1 }));
    }

    let record = read_models.get(&AggregateId::from("o-1")).await.unwrap().unwrap();
    assert_eq!(record.total_amount, Money::usd(2600));
    assert_eq!(record.items.len(), 3);
    assert_eq!(record.last_applied_version, Version::new(2));
    assert_eq!(dead_letters.len().await, 1);
}

#[tokio::test]
async fn poison_message_is_dead_lettered_and_consumption_continues() {
    let store = InMemoryStore::new();
    let bus = InMemoryEventBus::with_partitions(1);
    let read_models = InMemoryReadModelStore::new();
    let dead_letters = InMemoryDeadLetterQueue::new();

    bus.publish(
        DEFAULT_TOPIC,
        EventMessage::new("o-0", b"{not json".to_vec()).with_header(EVENT_TYPE_HEADER, "OrderCreated"),
    )
    .await
    .unwrap();
    bus.publish(
        DEFAULT_TOPIC,
        EventMessage::new("o-0", b"{}".to_vec()).with_header(EVENT_TYPE_HEADER, "OrderRefunded"),
    )
    .await
    .unwrap();

    OrderService::new(store.clone())
        .create_order(create_cmd("o-1"))
        .await
        .unwrap();
    publisher(&store, &bus).drain_once().await.unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = consumer(
        &bus,
        Arc::new(OrderProjection::new(read_models.clone())),
        &dead_letters,
        RetryPolicy::immediate(3),
    )
    .spawn(shutdown_rx);

    eventually(|| async { version_of(&read_models, "o-1").await.is_some() }).await;
    stop(shutdown_tx, handle).await;

    let letters = dead_letters.letters().await;
    assert_eq!(letters.len(), 1);
    assert!(letters[0].fatal);
    assert_eq!(letters[0].attempts, 1);
    assert_eq!(bus.lag(DEFAULT_TOPIC, DEFAULT_GROUP), 0);
}

#[tokio::test]
async fn item_removal_and_cancellation_reach_cached_read_model() {
    let store = InMemoryStore::new();
    let bus = InMemoryEventBus::new();
    let cache = InMemoryCache::default();
    let read_models = CachedReadModel::new(InMemoryReadModelStore::new(), cache.clone());
    let read_models = Arc::new(read_models);
    let dead_letters = InMemoryDeadLetterQueue::new();
    let service = OrderService::new(store.clone());
    let id = AggregateId::from("o-1");

    service.create_order(create_cmd("o-1")).await.unwrap();
    service
        .remove_item(RemoveItem::new(id.clone(), "p-1"))
        .await
        .unwrap();
    service
        .cancel_order(CancelOrder::new(id.clone(), "changed mind"))
        .await
        .unwrap();
    publisher(&store, &bus).drain_once().await.unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = consumer(
        &bus,
        Arc::new(OrderProjection::new(Arc::clone(&read_models))),
        &dead_letters,
        RetryPolicy::immediate(3),
    )
    .spawn(shutdown_rx);

    eventually(|| async { version_of(read_models.as_ref(), "o-1").await == Some(Version::new(3)) })
        .await;
    stop(shutdown_tx, handle).await;

    let cached = projections::ReadModelCache::get(&cache, &id).await.unwrap().unwrap();
    assert_eq!(cached.status, OrderStatus::Cancelled);
    assert_eq!(cached.items.len(), 1);
    assert_eq!(cached.total_amount, Money::usd(500));
}

/// Counts calls and always fails with a retryable error.
struct AlwaysRetry {
    calls: AtomicU32,
}

#[async_trait]
impl MessageHandler for AlwaysRetry {
    async fn handle(&self, _delivery: &Delivery) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(HandlerError::retryable("store offline"))
    }
}

#[tokio::test]
async fn shutdown_during_retry_leaves_message_uncommitted() {
    let bus = InMemoryEventBus::new();
    let dead_letters = InMemoryDeadLetterQueue::new();
    let handler = Arc::new(AlwaysRetry {
        calls: AtomicU32::new(0),
    });

    bus.publish(
        DEFAULT_TOPIC,
        EventMessage::new("o-1", b"{}".to_vec()).with_header(EVENT_TYPE_HEADER, "OrderConfirmed"),
    )
    .await
    .unwrap();

    let retry = RetryPolicy::default()
        .max_attempts(5)
        .initial_backoff(Duration::from_secs(60))
        .max_backoff(Duration::from_secs(60));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = consumer(&bus, handler.clone(), &dead_letters, retry).spawn(shutdown_rx);

    eventually(|| async { handler.calls.load(Ordering::SeqCst) >= 1 }).await;
    stop(shutdown_tx, handle).await;

    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    assert!(dead_letters.is_empty().await);
    assert_eq!(bus.lag(DEFAULT_TOPIC, DEFAULT_GROUP), 1);
}
