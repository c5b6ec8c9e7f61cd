//! Order service providing a simplified API for order operations.

use common::AggregateId;
use write_store::WriteStore;

use crate::command::{CommandHandler, CommandResult};
use crate::error::DomainError;

use super::{
    AddItem, CancelOrder, ConfirmOrder, CreateOrder, DeliverOrder, Order, OrderCommand,
    OrderEvent, RemoveItem, ShipOrder,
};

/// Service for managing orders.
///
/// Each method loads the order, runs the command and commits the new
/// state, event-log rows and outbox rows in a single unit of work.
pub struct OrderService<S: WriteStore> {
    handler: CommandHandler<S, Order>,
}

impl<S: WriteStore> OrderService<S> {
    /// Creates a new order service with the given store.
    pub fn new(store: S) -> Self {
        Self {
            handler: CommandHandler::new(store),
        }
    }

    /// Returns a reference to the underlying command handler.
    pub fn handler(&self) -> &CommandHandler<S, Order> {
        &self.handler
    }

    /// Creates a new draft order.
    #[tracing::instrument(skip(self))]
    pub async fn create_order(
        &self,
        cmd: CreateOrder,
    ) -> Result<CommandResult<Order>, DomainError> {
        let CreateOrder {
            order_id,
            customer_id,
            items,
            shipping_address,
        } = cmd;

        let result = self
            .handler
            .create(&order_id, |order| {
                order.create(order_id.clone(), customer_id, items, shipping_address)
            })
            .await;
        record("create_order", result)
    }

    /// Adds an item to a draft order.
    #[tracing::instrument(skip(self))]
    pub async fn add_item(&self, cmd: AddItem) -> Result<CommandResult<Order>, DomainError> {
        let AddItem { order_id, item } = cmd;

        let result = self
            .handler
            .execute(&order_id, |order| order.add_item(item))
            .await;
        record("add_item", result)
    }

    /// Removes an item from a draft order.
    #[tracing::instrument(skip(self))]
    pub async fn remove_item(&self, cmd: RemoveItem) -> Result<CommandResult<Order>, DomainError> {
        let RemoveItem {
            order_id,
            product_id,
        } = cmd;

        let result = self
            .handler
            .execute(&order_id, |order| order.remove_item(product_id))
            .await;
        record("remove_item", result)
    }

    #[tracing::instrument(skip(self))]
    pub async fn confirm_order(
        &self,
        cmd: ConfirmOrder,
    ) -> Result<CommandResult<Order>, DomainError> {
        let result = self
            .handler
            .execute(&cmd.order_id, |order| order.confirm())
            .await;
        record("confirm_order", result)
    }

    #[tracing::instrument(skip(self))]
    pub async fn ship_order(&self, cmd: ShipOrder) -> Result<CommandResult<Order>, DomainError> {
        let result = self
            .handler
            .execute(&cmd.order_id, |order| order.ship())
            .await;
        record("ship_order", result)
    }

    #[tracing::instrument(skip(self))]
    pub async fn deliver_order(
        &self,
        cmd: DeliverOrder,
    ) -> Result<CommandResult<Order>, DomainError> {
        let result = self
            .handler
            .execute(&cmd.order_id, |order| order.deliver())
            .await;
        record("deliver_order", result)
    }

    /// Cancels a draft or confirmed order.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(
        &self,
        cmd: CancelOrder,
    ) -> Result<CommandResult<Order>, DomainError> {
        let CancelOrder { order_id, reason } = cmd;

        let result = self
            .handler
            .execute(&order_id, |order| order.cancel(reason))
            .await;
        record("cancel_order", result)
    }

    /// Dispatches any order command.
    pub async fn apply(&self, cmd: OrderCommand) -> Result<CommandResult<Order>, DomainError> {
        match cmd {
            OrderCommand::Create(c) => self.create_order(c).await,
            OrderCommand::AddItem(c) => self.add_item(c).await,
            OrderCommand::RemoveItem(c) => self.remove_item(c).await,
            OrderCommand::Confirm(c) => self.confirm_order(c).await,
            OrderCommand::Ship(c) => self.ship_order(c).await,
            OrderCommand::Deliver(c) => self.deliver_order(c).await,
            OrderCommand::Cancel(c) => self.cancel_order(c).await,
        }
    }

    /// Loads an order by ID.
    ///
    /// Returns None if the order doesn't exist.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, order_id: &AggregateId) -> Result<Option<Order>, DomainError> {
        self.handler.load(order_id).await
    }

    /// Returns the logged events of an order, oldest first.
    pub async fn history(&self, order_id: &AggregateId) -> Result<Vec<OrderEvent>, DomainError> {
        self.handler.history(order_id).await
    }

    /// Rebuilds an order from its event log.
    pub async fn replay(&self, order_id: &AggregateId) -> Result<Option<Order>, DomainError> {
        self.handler.replay(order_id).await
    }
}

fn record(
    command: &'static str,
    result: Result<CommandResult<Order>, DomainError>,
) -> Result<CommandResult<Order>, DomainError> {
    let outcome = match &result {
        Ok(_) => "ok",
        Err(e) if e.is_rule_violation() => "rejected",
        Err(_) => "error",
    };
    metrics::counter!("orders_commands_total", "command" => command, "outcome" => outcome)
        .increment(1);

    if let Err(e) = &result
        && !e.is_rule_violation()
    {
        tracing::warn!(command, error = %e, "Order command failed");
    }
    result
}
