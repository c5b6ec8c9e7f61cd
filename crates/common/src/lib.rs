//! Shared types used by both the write side and the read side.

pub mod types;

pub use types::AggregateId;
