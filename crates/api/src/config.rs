//! Application configuration loaded from environment variables.

use std::time::Duration;

use event_bus::RetryPolicy;
use projections::{ConsumerConfig, DEFAULT_CACHE_TTL, DEFAULT_GROUP, DEFAULT_TOPIC};
use publisher::PublisherConfig;

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Server and pipeline configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `json` for JSON lines, anything else for human output
/// - `DATABASE_URL`: Postgres stores when set, in-memory stores otherwise
/// - `EVENT_TOPIC`, `CONSUMER_GROUP`
/// - `OUTBOX_POLL_INTERVAL_MS`, `OUTBOX_BATCH_SIZE`, `PUBLISH_TIMEOUT_MS`
/// - `CONSUMER_MAX_ATTEMPTS`, `CACHE_TTL_SECS`
/// - `KAFKA_BROKERS` (`kafka` feature), `REDIS_URL` (`redis` feature)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub event_topic: String,
    pub consumer_group: String,
    pub outbox_poll_interval: Duration,
    pub outbox_batch_size: usize,
    pub publish_timeout: Duration,
    pub consumer_max_attempts: u32,
    pub cache_ttl: Duration,
    pub kafka_brokers: Option<String>,
    pub redis_url: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from any key lookup. Unparseable numbers fall
    /// back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let number = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            host: non_empty("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: non_empty("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref() {
                Some("json") => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
            database_url: non_empty("DATABASE_URL"),
            event_topic: non_empty("EVENT_TOPIC").unwrap_or(defaults.event_topic),
            consumer_group: non_empty("CONSUMER_GROUP").unwrap_or(defaults.consumer_group),
            outbox_poll_interval: number("OUTBOX_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.outbox_poll_interval),
            outbox_batch_size: number("OUTBOX_BATCH_SIZE")
                .map(|n| n as usize)
                .unwrap_or(defaults.outbox_batch_size),
            publish_timeout: number("PUBLISH_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.publish_timeout),
            consumer_max_attempts: number("CONSUMER_MAX_ATTEMPTS")
                .map(|n| n.min(u32::MAX as u64) as u32)
                .unwrap_or(defaults.consumer_max_attempts),
            cache_ttl: number("CACHE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            kafka_brokers: non_empty("KAFKA_BROKERS"),
            redis_url: non_empty("REDIS_URL"),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig::default()
            .topic(self.event_topic.clone())
            .poll_interval(self.outbox_poll_interval)
            .batch_size(self.outbox_batch_size)
            .publish_timeout(self.publish_timeout)
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig::default()
            .topic(self.event_topic.clone())
            .group(self.consumer_group.clone())
            .retry(RetryPolicy::default().max_attempts(self.consumer_max_attempts))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            event_topic: DEFAULT_TOPIC.to_string(),
            consumer_group: DEFAULT_GROUP.to_string(),
            outbox_poll_interval: Duration::from_millis(5000),
            outbox_batch_size: 100,
            publish_timeout: Duration::from_millis(5000),
            consumer_max_attempts: 5,
            cache_ttl: DEFAULT_CACHE_TTL,
            kafka_brokers: None,
            redis_url: None,
        }
    }
}
