//! At-least-once event transport for the order pipeline.
//!
//! The [`EventBus`] trait is the seam between the outbox publisher and the
//! projection consumer. Messages are partitioned by key, so events of one
//! aggregate keep their order; nothing is ordered across keys.
//!
//! Consumers combine a [`Subscription`] with [`deliver`], which retries a
//! failing [`MessageHandler`] in place and moves poison messages to a
//! [`DeadLetterSink`]. Offsets are committed only after `deliver` returns.

pub mod bus;
pub mod dead_letter;
pub mod dispatch;
pub mod error;
pub mod handler;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
pub mod message;
pub mod retry;

pub use bus::{EventBus, Subscription};
pub use dead_letter::{DeadLetter, DeadLetterSink, InMemoryDeadLetterQueue, TopicDeadLetterSink};
pub use dispatch::{DeliveryOutcome, deliver};
pub use error::{EventBusError, Result};
pub use handler::{HandlerError, MessageHandler};
#[cfg(feature = "kafka")]
pub use kafka::{KafkaEventBus, KafkaEventBusBuilder};
pub use memory::{InMemoryEventBus, InMemorySubscription};
pub use message::{AGGREGATE_ID_HEADER, Ack, Delivery, EVENT_TYPE_HEADER, EventMessage};
pub use retry::RetryPolicy;
