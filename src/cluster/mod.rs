//! Cluster access boundary
//!
//! The readers only need three primitives from a streaming-platform client:
//! stream a topic from the beginning, list topic metadata, and query a
//! partition's high-water mark. They are expressed as traits so the readers
//! can run against any client, including in-memory fakes in tests.

#[cfg(feature = "kafka")]
mod kafka;

#[cfg(feature = "kafka")]
pub use kafka::{KafkaMetadataClient, KafkaOffsetLog};

use crate::error::Result;
use std::time::Duration;

/// A record read from a log topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Partition the record was read from
    pub partition: i32,
    /// Position of the record in its partition
    pub offset: i64,
    /// Raw key bytes
    pub key: Option<Vec<u8>>,
    /// Raw value bytes; absent for tombstones
    pub value: Option<Vec<u8>>,
}

/// Item produced by [`OffsetLogSource::poll`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    /// A record
    Record(RawRecord),
    /// The reader reached the current end of a partition
    EndOfPartition(i32),
}

/// Sequential reader of a log topic from its beginning
pub trait OffsetLogSource: Send {
    /// Start reading `topic` from the earliest offset of every partition.
    /// Returns the partitions that will be read.
    fn subscribe(&mut self, topic: &str) -> Result<Vec<i32>>;

    /// Wait up to `timeout` for the next event. `None` means nothing arrived.
    fn poll(&mut self, timeout: Duration) -> Option<Result<LogEvent>>;
}

/// Partition count of a topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMetadata {
    /// Topic name
    pub name: String,
    /// Number of partitions
    pub partitions: usize,
}

/// Metadata and high-water mark queries against the cluster
pub trait MetadataClient: Send {
    /// List every topic with its partition count
    fn fetch_topics(&self) -> Result<Vec<TopicMetadata>>;

    /// Current high-water mark of a partition
    fn high_watermark(&self, topic: &str, partition: i32) -> Result<u64>;
}
