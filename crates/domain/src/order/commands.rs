//! Order commands.

use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::command::Command;

use super::{Address, CustomerId, Order, OrderItem, ProductId};

/// Command to create a new draft order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrder {
    /// The order ID to create.
    pub order_id: AggregateId,

    /// The customer placing the order.
    pub customer_id: CustomerId,

    /// Initial line items. At least one is required.
    pub items: Vec<OrderItem>,

    pub shipping_address: Address,
}

impl CreateOrder {
    /// Creates a new CreateOrder command.
    pub fn new(
        order_id: AggregateId,
        customer_id: CustomerId,
        items: Vec<OrderItem>,
        shipping_address: Address,
    ) -> Self {
        Self {
            order_id,
            customer_id,
            items,
            shipping_address,
        }
    }

    /// Creates a new CreateOrder command with a generated order ID.
    pub fn for_customer(
        customer_id: CustomerId,
        items: Vec<OrderItem>,
        shipping_address: Address,
    ) -> Self {
        Self::new(AggregateId::new(), customer_id, items, shipping_address)
    }
}

impl Command for CreateOrder {
    type Aggregate = Order;

    fn aggregate_id(&self) -> &AggregateId {
        &self.order_id
    }
}

/// Command to add an item to a draft order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddItem {
    pub order_id: AggregateId,
    pub item: OrderItem,
}

impl AddItem {
    pub fn new(order_id: AggregateId, item: OrderItem) -> Self {
        Self { order_id, item }
    }
}

impl Command for AddItem {
    type Aggregate = Order;

    fn aggregate_id(&self) -> &AggregateId {
        &self.order_id
    }
}

/// Command to remove an item from a draft order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveItem {
    pub order_id: AggregateId,
    pub product_id: ProductId,
}

impl RemoveItem {
    pub fn new(order_id: AggregateId, product_id: impl Into<ProductId>) -> Self {
        Self {
            order_id,
            product_id: product_id.into(),
        }
    }
}

impl Command for RemoveItem {
    type Aggregate = Order;

    fn aggregate_id(&self) -> &AggregateId {
        &self.order_id
    }
}

macro_rules! status_command {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Serialize, Deserialize)]
        pub struct $name {
            pub order_id: AggregateId,
        }

        impl $name {
            pub fn new(order_id: AggregateId) -> Self {
                Self { order_id }
            }
        }

        impl Command for $name {
            type Aggregate = Order;

            fn aggregate_id(&self) -> &AggregateId {
                &self.order_id
            }
        }
    };
}

status_command!(
    /// Command to confirm a draft order.
    ConfirmOrder
);
status_command!(
    /// Command to ship a confirmed order.
    ShipOrder
);
status_command!(
    /// Command to mark a shipped order delivered.
    DeliverOrder
);

/// Command to cancel a draft or confirmed order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelOrder {
    pub order_id: AggregateId,

    /// Why the order was cancelled. Must not be blank.
    pub reason: String,
}

impl CancelOrder {
    pub fn new(order_id: AggregateId, reason: impl Into<String>) -> Self {
        Self {
            order_id,
            reason: reason.into(),
        }
    }
}

impl Command for CancelOrder {
    type Aggregate = Order;

    fn aggregate_id(&self) -> &AggregateId {
        &self.order_id
    }
}

/// Any order command, for callers that route commands generically.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum OrderCommand {
    Create(CreateOrder),
    AddItem(AddItem),
    RemoveItem(RemoveItem),
    Confirm(ConfirmOrder),
    Ship(ShipOrder),
    Deliver(DeliverOrder),
    Cancel(CancelOrder),
}

impl OrderCommand {
    /// Name used as the `command` label on metrics.
    pub fn name(&self) -> &'static str {
        match self {
            OrderCommand::Create(_) => "create_order",
            OrderCommand::AddItem(_) => "add_item",
            OrderCommand::RemoveItem(_) => "remove_item",
            OrderCommand::Confirm(_) => "confirm_order",
            OrderCommand::Ship(_) => "ship_order",
            OrderCommand::Deliver(_) => "deliver_order",
            OrderCommand::Cancel(_) => "cancel_order",
        }
    }

    pub fn aggregate_id(&self) -> &AggregateId {
        match self {
            OrderCommand::Create(c) => c.aggregate_id(),
            OrderCommand::AddItem(c) => c.aggregate_id(),
            OrderCommand::RemoveItem(c) => c.aggregate_id(),
            OrderCommand::Confirm(c) => c.aggregate_id(),
            OrderCommand::Ship(c) => c.aggregate_id(),
            OrderCommand::Deliver(c) => c.aggregate_id(),
            OrderCommand::Cancel(c) => c.aggregate_id(),
        }
    }
}
