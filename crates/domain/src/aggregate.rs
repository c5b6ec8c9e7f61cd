//! Core aggregate and domain event traits.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Serialize, de::DeserializeOwned};
use write_store::Version;

/// Trait for domain events.
///
/// Domain events are immutable facts, named in past tense. Each one carries
/// the aggregate version it produced.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Returns the event type name, as written to the log and the outbox.
    fn event_type(&self) -> &'static str;

    /// The aggregate version this event produced.
    fn version(&self) -> Version;

    fn occurred_at(&self) -> DateTime<Utc>;
}

/// Trait for aggregates whose current state is stored as a record.
///
/// State changes happen only through events: a command inspects the
/// current state and returns events; `apply` folds them in. The same
/// events are appended to the event log, so replaying the log yields the
/// stored state.
pub trait Aggregate:
    Default + Clone + Serialize + DeserializeOwned + Send + Sync + Sized
{
    /// The type of events this aggregate produces and consumes.
    type Event: DomainEvent;

    /// The type of errors this aggregate can produce.
    type Error: std::error::Error + Send + Sync;

    /// Returns the aggregate type name.
    fn aggregate_type() -> &'static str;

    /// Returns the aggregate's identifier, or None before creation.
    fn id(&self) -> Option<&AggregateId>;

    /// Version 0 for a new aggregate; the version of the last applied event
    /// otherwise.
    fn version(&self) -> Version;

    /// Applies an event. Must be deterministic and must not fail.
    fn apply(&mut self, event: Self::Event);

    /// Applies multiple events in sequence.
    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }
}
