//! Order aggregate implementation.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};
use write_store::Version;

use crate::aggregate::Aggregate;

use super::{
    Address, CustomerId, Money, OrderError, OrderEvent, OrderEventKind, OrderItem, OrderStatus,
    ProductId, order_total,
};

/// Order aggregate root.
///
/// Represents an order from draft through delivery or cancellation. The
/// stored record is this struct serialized as JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Order {
    /// Unique order identifier.
    id: Option<AggregateId>,

    /// Current version for optimistic concurrency.
    #[serde(default)]
    version: Version,

    /// Customer who placed the order.
    customer_id: Option<CustomerId>,

    /// Line items, in the order they were added.
    items: Vec<OrderItem>,

    status: OrderStatus,

    /// Sum of item subtotals. Its currency is the order's currency.
    total: Money,

    shipping_address: Option<Address>,

    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl Aggregate for Order {
    type Event = OrderEvent;
    type Error = OrderError;

    fn aggregate_type() -> &'static str {
        "Order"
    }

    fn id(&self) -> Option<&AggregateId> {
        self.id.as_ref()
    }

    fn version(&self) -> Version {
        self.version
    }

    fn apply(&mut self, event: Self::Event) {
        match event.kind {
            OrderEventKind::OrderCreated {
                customer_id,
                items,
                total_amount,
                shipping_address,
            } => {
                self.id = Some(event.aggregate_id);
                self.customer_id = Some(customer_id);
                self.items = items;
                self.total = total_amount;
                self.shipping_address = Some(shipping_address);
                self.status = OrderStatus::Draft;
                self.created_at = Some(event.occurred_at);
            }
            OrderEventKind::OrderItemAdded {
                product_id,
                quantity,
                price,
            } => {
                self.items.push(OrderItem {
                    product_id,
                    quantity,
                    price,
                });
                self.recompute_total();
            }
            OrderEventKind::OrderItemRemoved { product_id } => {
                if let Some(pos) = self.items.iter().position(|i| i.product_id == product_id) {
                    self.items.remove(pos);
                }
                self.recompute_total();
            }
            OrderEventKind::OrderConfirmed { .. } => self.status = OrderStatus::Confirmed,
            OrderEventKind::OrderShipped { .. } => self.status = OrderStatus::Shipped,
            OrderEventKind::OrderDelivered { .. } => self.status = OrderStatus::Delivered,
            OrderEventKind::OrderCancelled { .. } => self.status = OrderStatus::Cancelled,
        }
        self.version = event.version;
        self.updated_at = Some(event.occurred_at);
    }
}

// Query methods
impl Order {
    pub fn customer_id(&self) -> Option<&CustomerId> {
        self.customer_id.as_ref()
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn total(&self) -> &Money {
        &self.total
    }

    /// The currency every item of this order is priced in.
    pub fn currency(&self) -> &str {
        &self.total.currency
    }

    pub fn shipping_address(&self) -> Option<&Address> {
        self.shipping_address.as_ref()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn recompute_total(&mut self) {
        // Commands refuse items whose total would overflow, so this only
        // fails on a log written by something else.
        match order_total(&self.items, &self.total.currency) {
            Ok(total) => self.total = total,
            Err(e) => tracing::error!(error = %e, "Order total out of range, keeping previous total"),
        }
    }
}

// Command methods (return events)
impl Order {
    /// Creates a new draft order.
    pub fn create(
        &self,
        order_id: AggregateId,
        customer_id: CustomerId,
        items: Vec<OrderItem>,
        shipping_address: Address,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if self.id.is_some() {
            return Err(OrderError::AlreadyCreated);
        }
        if customer_id.is_blank() {
            return Err(OrderError::CustomerIdRequired);
        }
        let Some(first) = items.first() else {
            return Err(OrderError::NoItems);
        };
        shipping_address.validate()?;

        let currency = first.price.currency.clone();
        for item in &items {
            item.validate()?;
            if item.price.currency != currency {
                return Err(OrderError::CurrencyMismatch {
                    expected: currency,
                    actual: item.price.currency.clone(),
                });
            }
        }

        let total_amount = order_total(&items, &currency)?;
        Ok(vec![OrderEvent::new(
            order_id,
            self.version.next(),
            OrderEventKind::OrderCreated {
                customer_id,
                items,
                total_amount,
                shipping_address,
            },
        )])
    }

    /// Adds a line item. Only drafts accept new items.
    pub fn add_item(&self, item: OrderItem) -> Result<Vec<OrderEvent>, OrderError> {
        let order_id = self.require_created()?;
        self.require_items_unlocked("add item")?;
        item.validate()?;
        if item.price.currency != self.currency() {
            return Err(OrderError::CurrencyMismatch {
                expected: self.currency().to_string(),
                actual: item.price.currency,
            });
        }
        self.total.checked_add(&item.subtotal()?)?;

        Ok(vec![OrderEvent::new(
            order_id,
            self.version.next(),
            OrderEventKind::OrderItemAdded {
                product_id: item.product_id,
                quantity: item.quantity,
                price: item.price,
            },
        )])
    }

    /// Removes the first line for `product_id`.
    pub fn remove_item(&self, product_id: ProductId) -> Result<Vec<OrderEvent>, OrderError> {
        let order_id = self.require_created()?;
        self.require_items_unlocked("remove item")?;
        if !self.items.iter().any(|i| i.product_id == product_id) {
            return Err(OrderError::ItemNotFound {
                product_id: product_id.to_string(),
            });
        }

        Ok(vec![OrderEvent::new(
            order_id,
            self.version.next(),
            OrderEventKind::OrderItemRemoved { product_id },
        )])
    }

    /// Confirms a draft. The order must still have at least one item.
    pub fn confirm(&self) -> Result<Vec<OrderEvent>, OrderError> {
        self.require_transition(OrderStatus::Confirmed)?;
        if self.items.is_empty() {
            return Err(OrderError::NoItems);
        }
        self.status_event(|customer_id| OrderEventKind::OrderConfirmed { customer_id })
    }

    pub fn ship(&self) -> Result<Vec<OrderEvent>, OrderError> {
        self.require_transition(OrderStatus::Shipped)?;
        self.status_event(|customer_id| OrderEventKind::OrderShipped { customer_id })
    }

    pub fn deliver(&self) -> Result<Vec<OrderEvent>, OrderError> {
        self.require_transition(OrderStatus::Delivered)?;
        self.status_event(|customer_id| OrderEventKind::OrderDelivered { customer_id })
    }

    /// Cancels a draft or confirmed order.
    pub fn cancel(&self, reason: String) -> Result<Vec<OrderEvent>, OrderError> {
        if reason.trim().is_empty() {
            return Err(OrderError::CancellationReasonRequired);
        }
        self.require_transition(OrderStatus::Cancelled)?;
        self.status_event(|customer_id| OrderEventKind::OrderCancelled {
            customer_id,
            reason,
        })
    }

    fn require_created(&self) -> Result<AggregateId, OrderError> {
        self.id.clone().ok_or(OrderError::NotCreated)
    }

    fn require_items_unlocked(&self, action: &'static str) -> Result<(), OrderError> {
        if self.status.can_modify_items() {
            Ok(())
        } else {
            Err(OrderError::ItemsLocked {
                status: self.status,
                action,
            })
        }
    }

    fn require_transition(&self, to: OrderStatus) -> Result<(), OrderError> {
        self.require_created()?;
        if self.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(OrderError::InvalidStatusTransition {
                from: self.status,
                to,
            })
        }
    }

    fn status_event(
        &self,
        kind: impl FnOnce(CustomerId) -> OrderEventKind,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        let order_id = self.require_created()?;
        let customer_id = self.customer_id.clone().ok_or(OrderError::NotCreated)?;
        Ok(vec![OrderEvent::new(
            order_id,
            self.version.next(),
            kind(customer_id),
        )])
    }
}
