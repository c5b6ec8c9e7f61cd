//! Outbox publisher for the order pipeline.
//!
//! The [`OutboxPublisher`] moves committed events from the outbox to the
//! event bus: fetch a batch in creation order, publish each entry, and mark
//! it processed only after the bus acknowledged it. Anything not marked is
//! picked up again on the next cycle, so delivery is at-least-once.

pub mod config;
pub mod error;
pub mod publisher;

pub use config::{MIN_POLL_INTERVAL, PublisherConfig};
pub use error::{PublisherError, Result};
pub use publisher::{DrainReport, DrainTrigger, OutboxPublisher, to_message};
