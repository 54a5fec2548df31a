use super::{Handler, Interest};
use crate::store::{ConsumerOffset, OffsetStore, TopicPartition, TopicPartitionOffset};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::info;

/// Lag of one group on one partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LagUpdate {
    /// Consumer group
    pub group_id: String,
    /// Topic
    pub topic: String,
    /// Partition
    pub partition: i32,
    /// High-water mark minus committed offset, floored at zero
    pub lag: u64,
}

/// Destination of [`LagUpdate`]s
pub type LagSink = Box<dyn Fn(&LagUpdate) + Send + Sync>;

#[derive(Default)]
struct PartitionLag {
    high_water: Option<u64>,
    committed: BTreeMap<String, u64>,
}

impl PartitionLag {
    fn update_for(&self, tp: &TopicPartition, group_id: &str) -> Option<LagUpdate> {
        let high_water = self.high_water?;
        let committed = self.committed.get(group_id)?;
        Some(LagUpdate {
            group_id: group_id.to_string(),
            topic: tp.topic.clone(),
            partition: tp.partition,
            lag: high_water.saturating_sub(*committed),
        })
    }
}

/// Computes consumer lag from commits and high-water updates
///
/// Emits one update per affected group whenever either side of the
/// difference changes.
pub struct LagTracker {
    sink: LagSink,
    partitions: Mutex<HashMap<TopicPartition, PartitionLag>>,
}

impl LagTracker {
    /// Create a tracker emitting to `sink`
    pub fn new<F>(sink: F) -> Self
    where
        F: Fn(&LagUpdate) + Send + Sync + 'static,
    {
        Self {
            sink: Box::new(sink),
            partitions: Mutex::new(HashMap::new()),
        }
    }

    /// Create a tracker that logs every update
    pub fn logging() -> Self {
        Self::new(|update: &LagUpdate| {
            info!(
                "Lag of {} on {}/{} is {}",
                update.group_id, update.topic, update.partition, update.lag
            );
        })
    }

    /// Last computed lag of a group on a partition
    pub fn lag(&self, group_id: &str, topic: &str, partition: i32) -> Option<u64> {
        let tp = TopicPartition::new(topic, partition);
        let partitions = self.partitions.lock();
        partitions
            .get(&tp)?
            .update_for(&tp, group_id)
            .map(|update| update.lag)
    }

    fn emit(&self, updates: Vec<LagUpdate>) {
        for update in &updates {
            (self.sink)(update);
        }
    }
}

impl Handler for LagTracker {
    fn name(&self) -> &str {
        "lag-tracker"
    }

    fn interest(&self) -> Interest {
        Interest {
            consumer_commits: true,
            topic_updates: true,
            ..Interest::none()
        }
    }

    fn initialize(&self, store: &OffsetStore) {
        let mut partitions = self.partitions.lock();
        for topic in store.known_topics() {
            for update in store.topic_offsets(&topic) {
                partitions.entry(update.topic_partition()).or_default().high_water =
                    Some(update.offset);
            }
        }
        for group_id in store.known_consumers() {
            for commit in store.consumer_offsets(&group_id) {
                partitions
                    .entry(commit.topic_partition())
                    .or_default()
                    .committed
                    .insert(group_id.clone(), commit.offset);
            }
        }
    }

    fn on_consumer_commit(&self, commit: &ConsumerOffset) {
        let updates: Vec<LagUpdate> = {
            let tp = commit.topic_partition();
            let mut partitions = self.partitions.lock();
            let partition = partitions.entry(tp.clone()).or_default();
            partition
                .committed
                .insert(commit.group_id.clone(), commit.offset);
            partition.update_for(&tp, &commit.group_id).into_iter().collect()
        };
        self.emit(updates);
    }

    fn on_topic_update(&self, update: &TopicPartitionOffset) {
        let updates: Vec<LagUpdate> = {
            let tp = update.topic_partition();
            let mut partitions = self.partitions.lock();
            let partition = partitions.entry(tp.clone()).or_default();
            partition.high_water = Some(update.offset);
            partition
                .committed
                .keys()
                .filter_map(|group_id| partition.update_for(&tp, group_id))
                .collect()
        };
        self.emit(updates);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn recording_tracker() -> (LagTracker, Arc<Mutex<Vec<LagUpdate>>>) {
        let updates = Arc::new(Mutex::new(Vec::new()));
        let sink = updates.clone();
        let tracker = LagTracker::new(move |update: &LagUpdate| sink.lock().push(update.clone()));
        (tracker, updates)
    }

    fn lag(group_id: &str, lag: u64) -> LagUpdate {
        LagUpdate {
            group_id: group_id.to_string(),
            topic: "t".to_string(),
            partition: 0,
            lag,
        }
    }

    #[test]
    fn test_lag_needs_both_sides() {
        let (tracker, updates) = recording_tracker();
        tracker.on_consumer_commit(&ConsumerOffset {
            group_id: "g1".to_string(),
            topic: "t".to_string(),
            partition: 0,
            offset: 4,
        });
        assert!(updates.lock().is_empty());

        tracker.on_topic_update(&TopicPartitionOffset {
            topic: "t".to_string(),
            partition: 0,
            offset: 10,
        });
        assert_eq!(*updates.lock(), vec![lag("g1", 6)]);
        assert_eq!(tracker.lag("g1", "t", 0), Some(6));
    }

    #[test]
    fn test_topic_update_emits_per_group() {
        let store = OffsetStore::default();
        store.record_consumer_offset("a", "t", 0, 3);
        store.record_consumer_offset("b", "t", 0, 12);
        store.record_topic_offset("t", 0, 5);

        let (tracker, updates) = recording_tracker();
        tracker.initialize(&store);
        assert_eq!(tracker.lag("a", "t", 0), Some(2));

        tracker.on_topic_update(&TopicPartitionOffset {
            topic: "t".to_string(),
            partition: 0,
            offset: 20,
        });
        assert_eq!(*updates.lock(), vec![lag("a", 17), lag("b", 8)]);
    }

    #[test]
    fn test_commit_ahead_of_high_water_is_zero_lag() {
        let (tracker, updates) = recording_tracker();
        tracker.on_topic_update(&TopicPartitionOffset {
            topic: "t".to_string(),
            partition: 0,
            offset: 7,
        });
        tracker.on_consumer_commit(&ConsumerOffset {
            group_id: "g".to_string(),
            topic: "t".to_string(),
            partition: 0,
            offset: 9,
        });
        assert_eq!(*updates.lock(), vec![lag("g", 0)]);
    }
}
