//! Query side of the order pipeline.
//!
//! Order events arrive from the bus and are folded into one denormalized
//! [`OrderReadModel`] per order:
//! - [`OrderProjection`] applies events idempotently, keyed on the last
//!   applied version
//! - [`ProjectionConsumer`] runs the projection against a bus subscription
//! - [`ReadModelStore`] holds the records (in memory or Postgres), optionally
//!   behind a [`CachedReadModel`]
//! - [`ProjectionRebuilder`] re-projects the write-side event log

pub mod cache;
pub mod consumer;
pub mod error;
pub mod handler;
pub mod memory;
pub mod postgres;
pub mod read_model;
pub mod rebuild;

#[cfg(feature = "redis")]
pub use cache::RedisCache;
pub use cache::{CachedReadModel, DEFAULT_CACHE_TTL, InMemoryCache, ReadModelCache};
pub use consumer::{
    ConsumerConfig, ConsumerHandle, ConsumerState, DEFAULT_GROUP, DEFAULT_TOPIC, ProjectionConsumer,
};
pub use error::{ProjectionError, Result};
pub use handler::{OrderProjection, ProjectionOutcome};
pub use memory::InMemoryReadModelStore;
pub use postgres::PostgresReadModelStore;
pub use read_model::{
    AnalyticsPeriod, DEFAULT_LIST_LIMIT, InvalidPeriod, ListOrders, OrderAnalytics,
    OrderReadModel, ReadModelStore,
};
pub use rebuild::{ProjectionRebuilder, RebuildReport};
