use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AggregateId;

/// Unique identifier for an event-log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an event ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-aggregate version.
///
/// An aggregate that was never written is at version 0; every event bumps the
/// version by exactly one, so the first event carries version 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the initial version (0) for a new aggregate.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the first version (1) for the first event.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A row of the event log.
///
/// The log is append-only and unique on `(aggregate_id, version)`. It is
/// written in the same transaction as the aggregate record and is used to
/// rebuild aggregates and to re-project the read side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Unique identifier for this record.
    pub event_id: EventId,

    /// Wire name of the event kind (e.g. `"OrderCreated"`).
    pub event_type: String,

    /// The aggregate this event belongs to.
    pub aggregate_id: AggregateId,

    /// The type of aggregate (e.g. `"Order"`).
    pub aggregate_type: String,

    /// The aggregate version produced by this event.
    pub version: Version,

    /// When the event happened.
    pub occurred_at: DateTime<Utc>,

    /// The serialized event.
    pub event_data: serde_json::Value,
}

impl EventRecord {
    /// Creates a new record builder.
    pub fn builder() -> EventRecordBuilder {
        EventRecordBuilder::default()
    }
}

/// Builder for [`EventRecord`].
#[derive(Debug, Default)]
pub struct EventRecordBuilder {
    event_id: Option<EventId>,
    event_type: Option<String>,
    aggregate_id: Option<AggregateId>,
    aggregate_type: Option<String>,
    version: Option<Version>,
    occurred_at: Option<DateTime<Utc>>,
    event_data: Option<serde_json::Value>,
}

impl EventRecordBuilder {
    /// Sets the event ID. If not set, a new ID will be generated.
    pub fn event_id(mut self, id: EventId) -> Self {
        self.event_id = Some(id);
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn aggregate_id(mut self, id: AggregateId) -> Self {
        self.aggregate_id = Some(id);
        self
    }

    pub fn aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_type = Some(aggregate_type.into());
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    /// Sets the occurrence time. Defaults to now.
    pub fn occurred_at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(occurred_at);
        self
    }

    /// Serializes `data` as the event body.
    pub fn event_data<T: Serialize>(mut self, data: &T) -> Result<Self, serde_json::Error> {
        self.event_data = Some(serde_json::to_value(data)?);
        Ok(self)
    }

    /// Sets an already-serialized event body.
    pub fn event_data_raw(mut self, data: serde_json::Value) -> Self {
        self.event_data = Some(data);
        self
    }

    /// Builds the record.
    ///
    /// Missing identity fields fall back to defaults so that tests can build
    /// partial records; the store rejects records that fail validation.
    pub fn build(self) -> EventRecord {
        EventRecord {
            event_id: self.event_id.unwrap_or_default(),
            event_type: self.event_type.unwrap_or_default(),
            aggregate_id: self.aggregate_id.unwrap_or_default(),
            aggregate_type: self.aggregate_type.unwrap_or_default(),
            version: self.version.unwrap_or(Version::first()),
            occurred_at: self.occurred_at.unwrap_or_else(Utc::now),
            event_data: self.event_data.unwrap_or(serde_json::Value::Null),
        }
    }
}
