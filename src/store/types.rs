use serde::{Deserialize, Serialize};
use std::fmt;

/// A partition of a topic
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicPartition {
    /// Topic name
    pub topic: String,
    /// Partition id
    pub partition: i32,
}

impl TopicPartition {
    /// Create a topic-partition
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic, self.partition)
    }
}

/// Last committed position of a consumer group on one partition
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsumerOffset {
    /// Consumer group
    pub group_id: String,
    /// Topic
    pub topic: String,
    /// Partition
    pub partition: i32,
    /// Committed offset
    pub offset: u64,
}

impl ConsumerOffset {
    /// The partition this commit refers to
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }
}

/// High-water mark of one partition
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicPartitionOffset {
    /// Topic
    pub topic: String,
    /// Partition
    pub partition: i32,
    /// Latest observed high-water mark
    pub offset: u64,
}

impl TopicPartitionOffset {
    /// The partition this high-water mark belongs to
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }
}
