use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Header carrying the event kind, readable without decoding the payload.
pub const EVENT_TYPE_HEADER: &str = "event-type";

/// Header carrying the aggregate the event belongs to.
pub const AGGREGATE_ID_HEADER: &str = "aggregate-id";

/// A message as it travels over the bus.
///
/// `key` decides the partition; messages sharing a key keep their publish
/// order for every consumer group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMessage {
    pub key: String,
    pub payload: Vec<u8>,
    pub headers: BTreeMap<String, String>,
}

impl EventMessage {
    pub fn new(key: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            payload: payload.into(),
            headers: BTreeMap::new(),
        }
    }

    /// Adds a header, replacing any previous value with the same name.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// The `event-type` header, if present.
    pub fn event_type(&self) -> Option<&str> {
        self.header(EVENT_TYPE_HEADER)
    }
}

/// Broker acknowledgement for a published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// A message handed to a subscriber, with its position in the topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub message: EventMessage,
}
