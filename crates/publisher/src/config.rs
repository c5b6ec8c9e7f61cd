use std::time::Duration;

/// Shortest poll interval the drain loop accepts.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Tuning for the outbox drain loop.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Time between scheduled drain cycles.
    pub poll_interval: Duration,

    /// Maximum entries fetched per cycle.
    pub batch_size: usize,

    /// Upper bound on waiting for one broker ack.
    pub publish_timeout: Duration,

    /// Topic every order event is published to.
    pub topic: String,

    /// When set, processed entries older than this are deleted after each
    /// cycle.
    pub retention: Option<chrono::Duration>,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 100,
            publish_timeout: Duration::from_secs(5),
            topic: "orders".to_string(),
            retention: None,
        }
    }
}

impl PublisherConfig {
    /// Intervals below [`MIN_POLL_INTERVAL`] are raised to it.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn retention(mut self, retention: chrono::Duration) -> Self {
        self.retention = Some(retention);
        self
    }
}
