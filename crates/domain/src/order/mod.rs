//! Order aggregate and related types.

mod aggregate;
mod commands;
mod events;
mod service;
mod status;
mod value_objects;

pub use aggregate::Order;
pub use commands::{
    AddItem, CancelOrder, ConfirmOrder, CreateOrder, DeliverOrder, OrderCommand, RemoveItem,
    ShipOrder,
};
pub use events::{ORDER_EVENT_TYPES, OrderEvent, OrderEventKind};
pub use service::OrderService;
pub use status::{OrderStatus, UnknownStatus};
pub use value_objects::{
    Address, CustomerId, DEFAULT_CURRENCY, Money, OrderItem, ProductId, order_total,
};

use thiserror::Error;

/// Errors that can occur during order operations.
///
/// All of these are business-rule violations; storage failures are reported
/// through [`crate::DomainError::Store`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// Customer ID is required.
    #[error("Customer ID is required")]
    CustomerIdRequired,

    /// Order has no items.
    #[error("Order has no items")]
    NoItems,

    #[error("Shipping address is incomplete: {field} is required")]
    InvalidAddress { field: &'static str },

    #[error("Product ID is required")]
    ProductIdRequired,

    /// Invalid quantity.
    #[error("Invalid quantity for {product_id}: {quantity} (must be greater than 0)")]
    InvalidQuantity { product_id: String, quantity: u32 },

    /// Invalid price.
    #[error("Invalid price for {product_id}: {amount} (must not be negative)")]
    InvalidPrice { product_id: String, amount: i64 },

    #[error("Invalid currency code: {currency:?}")]
    InvalidCurrency { currency: String },

    #[error("Order amount exceeds the supported range")]
    AmountOverflow,

    #[error("Currency mismatch: order is in {expected}, item is in {actual}")]
    CurrencyMismatch { expected: String, actual: String },

    /// Item not found in order.
    #[error("Item not found: {product_id}")]
    ItemNotFound { product_id: String },

    #[error("Cannot {action} in {status} status")]
    ItemsLocked {
        status: OrderStatus,
        action: &'static str,
    },

    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition { from: OrderStatus, to: OrderStatus },

    #[error("Cancellation reason is required")]
    CancellationReasonRequired,

    /// Order is already created.
    #[error("Order already created")]
    AlreadyCreated,

    #[error("Order has not been created")]
    NotCreated,
}

impl OrderError {
    /// True for rejections caused by the order's current state rather than
    /// by the command's input.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            OrderError::InvalidStatusTransition { .. }
                | OrderError::ItemsLocked { .. }
                | OrderError::AlreadyCreated
        )
    }
}
