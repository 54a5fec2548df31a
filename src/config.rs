//! Tracker configuration

use crate::error::{LagError, Result};
use crate::scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

/// Extra client properties that may be passed through to librdkafka.
/// Anything touching group membership or offset handling is managed here.
pub const ALLOWED_KAFKA_PROPS: &[&str] = &[
    // Security settings
    "security.protocol",
    "sasl.mechanism",
    "sasl.mechanisms",
    "sasl.username",
    "sasl.password",
    "ssl.ca.location",
    "ssl.certificate.location",
    "ssl.key.location",
    "ssl.key.password",
    "ssl.endpoint.identification.algorithm",
    // Request settings
    "request.timeout.ms",
    "metadata.max.age.ms",
    "socket.timeout.ms",
    "receive.buffer.bytes",
    "send.buffer.bytes",
    // Fetch settings
    "fetch.min.bytes",
    "fetch.wait.max.ms",
    "fetch.max.bytes",
    "max.partition.fetch.bytes",
    "queued.min.messages",
    "queued.max.messages.kbytes",
    // Connection settings
    "reconnect.backoff.ms",
    "reconnect.backoff.max.ms",
    "connections.max.idle.ms",
    "client.id",
    "client.rack",
];

/// Lag tracker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Kafka broker addresses (comma-separated)
    pub brokers: String,

    /// Group id used by the tracker's own clients; random when unset.
    /// The tracker never commits offsets.
    pub group_id: Option<String>,

    /// Additional Kafka properties, restricted to [`ALLOWED_KAFKA_PROPS`]
    pub kafka_properties: HashMap<String, String>,

    /// Worker threads executing high-water mark queries
    pub query_threads: usize,
    /// Number of metadata connections; bounds concurrent cluster queries
    pub connection_count: usize,
    /// Queue ceiling of the query worker pool
    pub max_pending_queries: usize,

    /// Worker threads delivering commit-watch notifications
    pub notification_threads: usize,
    /// Queue ceiling for commit-watch notifications
    pub max_pending_notifications: usize,
    /// Debounce window of commit-watch notifications
    pub commit_watch_cooldown_ms: u64,
    /// Debounce window of per-group and per-topic store notifications
    pub store_cooldown_ms: u64,

    /// Re-poll period of a partition at priority 1.0
    pub topic_poll_period_ms: u64,
    /// Period of topic metadata re-discovery
    pub metadata_refresh_period_ms: u64,

    /// See [`SchedulerConfig::minimum_reschedule`]
    pub minimum_reschedule_ms: u64,
    /// See [`SchedulerConfig::priority_adjustment_window`]
    pub priority_adjustment_window_ms: u64,
    /// See [`SchedulerConfig::minimum_priority`]
    pub minimum_priority: f64,
    /// Priority given to a partition whenever a commit on it is observed
    pub commit_priority: f64,

    /// Offset-log poll timeout; also bounds how long stopping the reader takes
    pub poll_timeout_ms: u64,
    /// Metadata request timeout
    pub metadata_timeout_ms: u64,
    /// High-water mark query timeout
    pub query_timeout_ms: u64,

    /// Track `__`-prefixed internal topics too
    pub include_internal_topics: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            group_id: None,
            kafka_properties: HashMap::new(),
            query_threads: 2,
            connection_count: 2,
            max_pending_queries: 10_000,
            notification_threads: 1,
            max_pending_notifications: 10_000,
            commit_watch_cooldown_ms: 10_000,
            store_cooldown_ms: 0,
            topic_poll_period_ms: 60_000,
            metadata_refresh_period_ms: 300_000,
            minimum_reschedule_ms: 10_000,
            priority_adjustment_window_ms: 30_000,
            minimum_priority: 0.1,
            commit_priority: 0.1,
            poll_timeout_ms: 1_000,
            metadata_timeout_ms: 10_000,
            query_timeout_ms: 5_000,
            include_internal_topics: false,
        }
    }
}

impl TrackerConfig {
    /// Create a new config builder
    pub fn builder() -> TrackerConfigBuilder {
        TrackerConfigBuilder::new()
    }

    /// Load a YAML configuration file. Missing fields take their defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TrackerConfig = serde_yaml::from_str(&content)?;
        config.validate().map_err(LagError::Config)?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.brokers.trim().is_empty() {
            return Err("Brokers cannot be empty".to_string());
        }

        if matches!(&self.group_id, Some(group_id) if group_id.is_empty()) {
            return Err("Group ID cannot be empty when set".to_string());
        }

        if self.query_threads == 0 || self.notification_threads == 0 {
            return Err("Thread counts must be greater than 0".to_string());
        }

        if self.connection_count == 0 {
            return Err("Connection count must be greater than 0".to_string());
        }

        if self.max_pending_queries == 0 || self.max_pending_notifications == 0 {
            return Err("Queue ceilings must be greater than 0".to_string());
        }

        if self.topic_poll_period_ms == 0 || self.metadata_refresh_period_ms == 0 {
            return Err("Poll periods must be greater than 0".to_string());
        }

        if self.poll_timeout_ms == 0 || self.metadata_timeout_ms == 0 || self.query_timeout_ms == 0 {
            return Err("Timeouts must be greater than 0".to_string());
        }

        if !(self.minimum_priority > 0.0 && self.minimum_priority <= 1.0) {
            return Err("Minimum priority must be in (0, 1]".to_string());
        }

        if !(self.commit_priority >= self.minimum_priority && self.commit_priority <= 1.0) {
            return Err("Commit priority must be between the minimum priority and 1".to_string());
        }

        for key in self.kafka_properties.keys() {
            if !ALLOWED_KAFKA_PROPS.contains(&key.as_str()) {
                return Err(format!(
                    "Disallowed Kafka property '{}'. Allowed properties: {:?}",
                    key, ALLOWED_KAFKA_PROPS
                ));
            }
        }

        Ok(())
    }

    /// The configured group id, or a fresh random one
    pub fn reader_group_id(&self) -> String {
        self.group_id.clone().unwrap_or_else(random_group_id)
    }

    /// Scheduler tunables derived from this config
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            minimum_reschedule: Duration::from_millis(self.minimum_reschedule_ms),
            priority_adjustment_window: Duration::from_millis(self.priority_adjustment_window_ms),
            minimum_priority: self.minimum_priority,
            ..SchedulerConfig::default()
        }
    }

    /// Debounce window of commit-watch notifications
    pub fn commit_watch_cooldown(&self) -> Duration {
        Duration::from_millis(self.commit_watch_cooldown_ms)
    }

    /// Debounce window of store notifications
    pub fn store_cooldown(&self) -> Duration {
        Duration::from_millis(self.store_cooldown_ms)
    }

    /// Re-poll period of a partition at priority 1.0
    pub fn topic_poll_period(&self) -> Duration {
        Duration::from_millis(self.topic_poll_period_ms)
    }

    /// Period of topic metadata re-discovery
    pub fn metadata_refresh_period(&self) -> Duration {
        Duration::from_millis(self.metadata_refresh_period_ms)
    }

    /// Offset-log poll timeout
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Metadata request timeout
    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_timeout_ms)
    }

    /// High-water mark query timeout
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

/// Random group id so the tracker never joins a real consumer group
pub fn random_group_id() -> String {
    format!("lagwatch-{}", Uuid::new_v4().simple())
}

/// Builder for TrackerConfig
pub struct TrackerConfigBuilder {
    config: TrackerConfig,
}

impl TrackerConfigBuilder {
    /// Create a builder with default values
    pub fn new() -> Self {
        Self {
            config: TrackerConfig::default(),
        }
    }

    /// Set the broker addresses
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.config.brokers = brokers.into();
        self
    }

    /// Set a fixed group id
    pub fn group_id(mut self, group_id: impl Into<String>) -> Self {
        self.config.group_id = Some(group_id.into());
        self
    }

    /// Add a custom Kafka property
    pub fn kafka_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.kafka_properties.insert(key.into(), value.into());
        self
    }

    /// Set the number of query worker threads
    pub fn query_threads(mut self, threads: usize) -> Self {
        self.config.query_threads = threads;
        self
    }

    /// Set the number of metadata connections
    pub fn connection_count(mut self, count: usize) -> Self {
        self.config.connection_count = count;
        self
    }

    /// Set the query queue ceiling
    pub fn max_pending_queries(mut self, max: usize) -> Self {
        self.config.max_pending_queries = max;
        self
    }

    /// Set the number of notification threads
    pub fn notification_threads(mut self, threads: usize) -> Self {
        self.config.notification_threads = threads;
        self
    }

    /// Set the notification queue ceiling
    pub fn max_pending_notifications(mut self, max: usize) -> Self {
        self.config.max_pending_notifications = max;
        self
    }

    /// Set the commit-watch debounce window
    pub fn commit_watch_cooldown(mut self, cooldown: Duration) -> Self {
        self.config.commit_watch_cooldown_ms = cooldown.as_millis() as u64;
        self
    }

    /// Set the store notification debounce window
    pub fn store_cooldown(mut self, cooldown: Duration) -> Self {
        self.config.store_cooldown_ms = cooldown.as_millis() as u64;
        self
    }

    /// Set the base re-poll period of each partition
    pub fn topic_poll_period(mut self, period: Duration) -> Self {
        self.config.topic_poll_period_ms = period.as_millis() as u64;
        self
    }

    /// Set the metadata re-discovery period
    pub fn metadata_refresh_period(mut self, period: Duration) -> Self {
        self.config.metadata_refresh_period_ms = period.as_millis() as u64;
        self
    }

    /// Set the minimum reschedule threshold
    pub fn minimum_reschedule(mut self, threshold: Duration) -> Self {
        self.config.minimum_reschedule_ms = threshold.as_millis() as u64;
        self
    }

    /// Set the priority decay window
    pub fn priority_adjustment_window(mut self, window: Duration) -> Self {
        self.config.priority_adjustment_window_ms = window.as_millis() as u64;
        self
    }

    /// Set the priority floor
    pub fn minimum_priority(mut self, priority: f64) -> Self {
        self.config.minimum_priority = priority;
        self
    }

    /// Set the priority applied when a commit is observed
    pub fn commit_priority(mut self, priority: f64) -> Self {
        self.config.commit_priority = priority;
        self
    }

    /// Set the offset-log poll timeout
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.config.poll_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Track internal topics too
    pub fn include_internal_topics(mut self, include: bool) -> Self {
        self.config.include_internal_topics = include;
        self
    }

    /// Build the configuration
    pub fn build(self) -> TrackerConfig {
        self.config
    }
}

impl Default for TrackerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = TrackerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler_config(), SchedulerConfig::default());
    }

    #[test]
    fn test_builder() {
        let config = TrackerConfig::builder()
            .brokers("kafka-1:9092,kafka-2:9092")
            .group_id("lag-reader")
            .query_threads(4)
            .topic_poll_period(Duration::from_secs(5))
            .kafka_property("security.protocol", "SASL_SSL")
            .build();

        assert_eq!(config.brokers, "kafka-1:9092,kafka-2:9092");
        assert_eq!(config.reader_group_id(), "lag-reader");
        assert_eq!(config.query_threads, 4);
        assert_eq!(config.topic_poll_period(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[rstest]
    #[case::empty_brokers(TrackerConfig::builder().brokers(" ").build())]
    #[case::no_query_threads(TrackerConfig::builder().query_threads(0).build())]
    #[case::no_connections(TrackerConfig::builder().connection_count(0).build())]
    #[case::no_queue(TrackerConfig::builder().max_pending_queries(0).build())]
    #[case::zero_period(TrackerConfig::builder().topic_poll_period(Duration::ZERO).build())]
    #[case::zero_priority(TrackerConfig::builder().minimum_priority(0.0).build())]
    #[case::commit_below_floor(
        TrackerConfig::builder().minimum_priority(0.5).commit_priority(0.2).build()
    )]
    #[case::disallowed_property(
        TrackerConfig::builder().kafka_property("enable.auto.commit", "true").build()
    )]
    fn test_invalid_configs(#[case] config: TrackerConfig) {
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_random_group_id() {
        let config = TrackerConfig::default();
        let first = config.reader_group_id();
        let second = config.reader_group_id();
        assert!(first.starts_with("lagwatch-"));
        assert_eq!(first.len(), "lagwatch-".len() + 32);
        assert_ne!(first, second);
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "brokers: broker:9093\nquery_threads: 3\ncommit_priority: 0.25\nkafka_properties:\n  security.protocol: SSL"
        )
        .unwrap();

        let config = TrackerConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.brokers, "broker:9093");
        assert_eq!(config.query_threads, 3);
        assert_eq!(config.commit_priority, 0.25);
        assert_eq!(config.connection_count, 2);
        assert_eq!(
            config.kafka_properties.get("security.protocol").map(String::as_str),
            Some("SSL")
        );
    }

    #[test]
    fn test_from_yaml_file_rejects_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "query_threads: 0").unwrap();
        assert!(matches!(
            TrackerConfig::from_yaml_file(file.path()),
            Err(LagError::Config(_))
        ));
        assert!(matches!(
            TrackerConfig::from_yaml_file("/nonexistent/lagwatch.yaml"),
            Err(LagError::Io(_))
        ));
    }
}
