//! Domain layer for the order pipeline.
//!
//! This crate provides:
//! - Aggregate and DomainEvent traits
//! - CommandHandler, which turns a command into one atomic unit of work
//!   (aggregate record, event log, outbox)
//! - The Order aggregate and its status machine

pub mod aggregate;
pub mod command;
pub mod error;
pub mod order;

pub use aggregate::{Aggregate, DomainEvent};
pub use command::{Command, CommandHandler, CommandResult};
pub use error::DomainError;
pub use order::{
    AddItem, Address, CancelOrder, ConfirmOrder, CreateOrder, CustomerId, DeliverOrder, Money,
    ORDER_EVENT_TYPES, Order, OrderCommand, OrderError, OrderEvent, OrderEventKind, OrderItem,
    OrderService, OrderStatus, ProductId, RemoveItem, ShipOrder, UnknownStatus, order_total,
};
