use super::Handler;
use crate::store::{ConsumerOffset, OffsetStore, TopicPartitionOffset};
use tracing::info;

/// Logs every store event
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl Handler for LoggingHandler {
    fn name(&self) -> &str {
        "logging"
    }

    fn initialize(&self, store: &OffsetStore) {
        info!(
            "Tracking {} consumer groups across {} topics",
            store.known_consumers().len(),
            store.known_topics().len()
        );
    }

    fn on_new_consumer(&self, group_id: &str) {
        info!("New consumer group {}", group_id);
    }

    fn on_new_topic(&self, topic: &str) {
        info!("New topic {}", topic);
    }

    fn on_consumer_commit(&self, commit: &ConsumerOffset) {
        info!(
            "Group {} committed {}/{} at {}",
            commit.group_id, commit.topic, commit.partition, commit.offset
        );
    }

    fn on_topic_update(&self, update: &TopicPartitionOffset) {
        info!(
            "High watermark of {}/{} is {}",
            update.topic, update.partition, update.offset
        );
    }
}
