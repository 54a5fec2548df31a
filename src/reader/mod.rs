//! Readers that keep the [`OffsetStore`](crate::store::OffsetStore) current

mod consumer_offsets;
mod topic_offsets;

pub use consumer_offsets::{ConsumerOffsetReader, ReaderState};
pub use topic_offsets::TopicOffsetReader;

use crate::store::{ConsumerOffset, TopicPartition};

/// Callback invoked when a commit on a watched partition is observed
pub type CommitCallback = Box<dyn Fn(&ConsumerOffset) + Send + Sync>;

/// Subscription to commits on individual topic-partitions
pub trait CommitWatch: Send + Sync {
    /// Call `callback` (debounced) whenever any group commits on
    /// `topic_partition` after the commit log has been caught up
    fn watch_commits(&self, topic_partition: TopicPartition, callback: CommitCallback);
}
