//! Order domain events.
//!
//! On the wire every event is a flat JSON object: the common envelope fields
//! plus the fields of its kind, discriminated by `event_type`.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};
use write_store::Version;

use crate::aggregate::DomainEvent;

use super::{Address, CustomerId, Money, OrderItem, OrderStatus, ProductId};

/// Every `event_type` an order can emit.
pub const ORDER_EVENT_TYPES: [&str; 7] = [
    "OrderCreated",
    "OrderConfirmed",
    "OrderShipped",
    "OrderDelivered",
    "OrderCancelled",
    "OrderItemAdded",
    "OrderItemRemoved",
];

/// An event that occurred on an order aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub aggregate_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
    /// The aggregate version this event produced.
    pub version: Version,
    #[serde(flatten)]
    pub kind: OrderEventKind,
}

/// Kind-specific payload of an [`OrderEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum OrderEventKind {
    OrderCreated {
        customer_id: CustomerId,
        items: Vec<OrderItem>,
        total_amount: Money,
        shipping_address: Address,
    },
    OrderConfirmed {
        customer_id: CustomerId,
    },
    OrderShipped {
        customer_id: CustomerId,
    },
    OrderDelivered {
        customer_id: CustomerId,
    },
    OrderCancelled {
        customer_id: CustomerId,
        reason: String,
    },
    OrderItemAdded {
        product_id: ProductId,
        quantity: u32,
        price: Money,
    },
    OrderItemRemoved {
        product_id: ProductId,
    },
}

impl OrderEvent {
    pub fn new(aggregate_id: AggregateId, version: Version, kind: OrderEventKind) -> Self {
        Self {
            aggregate_id,
            occurred_at: Utc::now(),
            version,
            kind,
        }
    }

    /// Parses an event from its JSON wire form.
    pub fn from_json(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// Serializes the event to its JSON wire form.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Returns true if `event_type` names an order event.
    pub fn is_known(event_type: &str) -> bool {
        ORDER_EVENT_TYPES.contains(&event_type)
    }
}

impl OrderEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            OrderEventKind::OrderCreated { .. } => "OrderCreated",
            OrderEventKind::OrderConfirmed { .. } => "OrderConfirmed",
            OrderEventKind::OrderShipped { .. } => "OrderShipped",
            OrderEventKind::OrderDelivered { .. } => "OrderDelivered",
            OrderEventKind::OrderCancelled { .. } => "OrderCancelled",
            OrderEventKind::OrderItemAdded { .. } => "OrderItemAdded",
            OrderEventKind::OrderItemRemoved { .. } => "OrderItemRemoved",
        }
    }

    /// The status an order is in after this event, for status-changing
    /// events.
    pub fn target_status(&self) -> Option<OrderStatus> {
        match self {
            OrderEventKind::OrderCreated { .. } => Some(OrderStatus::Draft),
            OrderEventKind::OrderConfirmed { .. } => Some(OrderStatus::Confirmed),
            OrderEventKind::OrderShipped { .. } => Some(OrderStatus::Shipped),
            OrderEventKind::OrderDelivered { .. } => Some(OrderStatus::Delivered),
            OrderEventKind::OrderCancelled { .. } => Some(OrderStatus::Cancelled),
            OrderEventKind::OrderItemAdded { .. } | OrderEventKind::OrderItemRemoved { .. } => {
                None
            }
        }
    }
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        self.kind.name()
    }

    fn version(&self) -> Version {
        self.version
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}
