//! Write-side persistence for the order pipeline.
//!
//! One transactional boundary covers three tables:
//! - aggregate records (current state, optimistic version)
//! - the event log (audit/replay, unique on aggregate id + version)
//! - the outbox (events waiting to be published)
//!
//! [`WriteStore::commit`] writes all three atomically; [`OutboxStore`] is the
//! publisher's view of the outbox.

pub mod aggregate;
pub mod error;
pub mod event;
pub mod memory;
pub mod outbox;
pub mod postgres;
pub mod store;

pub use aggregate::AggregateRecord;
pub use common::AggregateId;
pub use error::{Result, StoreError};
pub use event::{EventId, EventRecord, EventRecordBuilder, Version};
pub use memory::{FaultPlan, InMemoryStore};
pub use outbox::{OutboxEntry, OutboxId, OutboxStore};
pub use postgres::PostgresStore;
pub use store::{EventStream, UnitOfWork, WriteStore};
