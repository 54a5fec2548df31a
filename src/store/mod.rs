//! Shared in-memory offset state
//!
//! Consumer commits and topic high-water marks live behind independent locks.
//! Change notifications are suppressed until
//! [`OffsetStore::enable_notifications`] is called, and always fire after the
//! relevant lock has been released.
//!
//! High-water marks are stored as last observed: a query result lower than
//! the stored value replaces it. This tolerates offset resets on the cluster
//! side at the cost of reporting them as-is.

mod types;

pub use types::{ConsumerOffset, TopicPartition, TopicPartitionOffset};

use crate::observer::Observer;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Default)]
struct ConsumerState {
    offsets: HashMap<String, BTreeMap<TopicPartition, u64>>,
    known: BTreeSet<String>,
}

#[derive(Default)]
struct TopicState {
    offsets: BTreeMap<TopicPartition, u64>,
    known: BTreeSet<String>,
}

/// Thread-safe store of consumer offsets and topic high-water marks
pub struct OffsetStore {
    consumers: RwLock<ConsumerState>,
    topics: RwLock<TopicState>,
    notifications_enabled: AtomicBool,
    new_consumer: Observer<(), String>,
    new_topic: Observer<(), String>,
    consumer_commit: Observer<String, ConsumerOffset>,
    topic_update: Observer<String, TopicPartitionOffset>,
}

impl OffsetStore {
    /// Create a store whose per-group commit and per-topic update
    /// notifications are debounced by `cooldown`
    pub fn new(cooldown: Duration) -> Self {
        Self {
            consumers: RwLock::new(ConsumerState::default()),
            topics: RwLock::new(TopicState::default()),
            notifications_enabled: AtomicBool::new(false),
            new_consumer: Observer::new(),
            new_topic: Observer::new(),
            consumer_commit: Observer::with_cooldown(cooldown),
            topic_update: Observer::with_cooldown(cooldown),
        }
    }

    /// Record a consumer group's commit, replacing any earlier offset for the
    /// same partition
    pub fn record_consumer_offset(&self, group_id: &str, topic: &str, partition: i32, offset: u64) {
        let first_seen = {
            let mut consumers = self.consumers.write();
            let first_seen = consumers.known.insert(group_id.to_string());
            consumers
                .offsets
                .entry(group_id.to_string())
                .or_default()
                .insert(TopicPartition::new(topic, partition), offset);
            first_seen
        };

        if !self.notifications_enabled() {
            return;
        }
        let group_id = group_id.to_string();
        if first_seen {
            debug!("New consumer group {}", group_id);
            self.new_consumer.notify(&(), &group_id);
        }
        let commit = ConsumerOffset {
            group_id: group_id.clone(),
            topic: topic.to_string(),
            partition,
            offset,
        };
        self.consumer_commit.notify(&group_id, &commit);
    }

    /// Record a high-water mark query result. Notifies only if the value
    /// differs from the stored one.
    pub fn record_topic_offset(&self, topic: &str, partition: i32, offset: u64) {
        let (changed, first_seen) = {
            let mut topics = self.topics.write();
            let first_seen = topics.known.insert(topic.to_string());
            let previous = topics
                .offsets
                .insert(TopicPartition::new(topic, partition), offset);
            (previous != Some(offset), first_seen)
        };

        if !self.notifications_enabled() {
            return;
        }
        let topic = topic.to_string();
        if first_seen {
            debug!("New topic {}", topic);
            self.new_topic.notify(&(), &topic);
        }
        if changed {
            let update = TopicPartitionOffset {
                topic: topic.clone(),
                partition,
                offset,
            };
            self.topic_update.notify(&topic, &update);
        }
    }

    /// All committed offsets of a group, ordered by topic and partition
    pub fn consumer_offsets(&self, group_id: &str) -> Vec<ConsumerOffset> {
        let consumers = self.consumers.read();
        consumers
            .offsets
            .get(group_id)
            .map(|offsets| {
                offsets
                    .iter()
                    .map(|(tp, offset)| ConsumerOffset {
                        group_id: group_id.to_string(),
                        topic: tp.topic.clone(),
                        partition: tp.partition,
                        offset: *offset,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Committed offset of a group on one partition
    pub fn consumer_offset(&self, group_id: &str, topic: &str, partition: i32) -> Option<u64> {
        let consumers = self.consumers.read();
        consumers
            .offsets
            .get(group_id)?
            .get(&TopicPartition::new(topic, partition))
            .copied()
    }

    /// Latest high-water mark of a partition
    pub fn topic_offset(&self, topic: &str, partition: i32) -> Option<u64> {
        self.topics
            .read()
            .offsets
            .get(&TopicPartition::new(topic, partition))
            .copied()
    }

    /// High-water marks of every known partition of a topic
    pub fn topic_offsets(&self, topic: &str) -> Vec<TopicPartitionOffset> {
        let topics = self.topics.read();
        topics
            .offsets
            .range(TopicPartition::new(topic, i32::MIN)..=TopicPartition::new(topic, i32::MAX))
            .map(|(tp, offset)| TopicPartitionOffset {
                topic: tp.topic.clone(),
                partition: tp.partition,
                offset: *offset,
            })
            .collect()
    }

    /// Consumer lag of a group on a partition, `high_water - committed`
    /// floored at zero. `None` unless both positions are known.
    pub fn lag(&self, group_id: &str, topic: &str, partition: i32) -> Option<u64> {
        let committed = self.consumer_offset(group_id, topic, partition)?;
        let high_water = self.topic_offset(topic, partition)?;
        Some(high_water.saturating_sub(committed))
    }

    /// Every consumer group seen so far, sorted
    pub fn known_consumers(&self) -> Vec<String> {
        self.consumers.read().known.iter().cloned().collect()
    }

    /// Every topic seen so far, sorted
    pub fn known_topics(&self) -> Vec<String> {
        self.topics.read().known.iter().cloned().collect()
    }

    /// Start emitting change notifications
    pub fn enable_notifications(&self) {
        if !self.notifications_enabled.swap(true, Ordering::AcqRel) {
            info!("Offset store notifications enabled");
        }
    }

    /// Whether change notifications are emitted
    pub fn notifications_enabled(&self) -> bool {
        self.notifications_enabled.load(Ordering::Acquire)
    }

    /// Subscribe to first-seen consumer groups
    pub fn on_new_consumer<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.new_consumer
            .observe((), move |_: &(), group_id: &String| callback(group_id));
    }

    /// Subscribe to first-seen topics
    pub fn on_new_topic<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.new_topic
            .observe((), move |_: &(), topic: &String| callback(topic));
    }

    /// Subscribe to commits of one consumer group
    pub fn on_consumer_commit<F>(&self, group_id: &str, callback: F)
    where
        F: Fn(&ConsumerOffset) + Send + Sync + 'static,
    {
        self.consumer_commit
            .observe(group_id.to_string(), move |_: &String, commit: &ConsumerOffset| {
                callback(commit)
            });
    }

    /// Subscribe to high-water mark changes of one topic
    pub fn on_topic_update<F>(&self, topic: &str, callback: F)
    where
        F: Fn(&TopicPartitionOffset) + Send + Sync + 'static,
    {
        self.topic_update.observe(
            topic.to_string(),
            move |_: &String, update: &TopicPartitionOffset| callback(update),
        );
    }
}

impl Default for OffsetStore {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}
