//! Handlers reacting to store events
//!
//! A [`Handler`] implements the hooks it cares about and declares them through
//! [`Handler::interest`]. [`Plugin::launch`] wires it to an
//! [`OffsetStore`]: it subscribes to first-seen consumers and topics, replays
//! the ones already known, and subscribes each group's commit feed and each
//! topic's high-water feed as they appear. Every hook invocation is isolated,
//! so a panicking handler only loses that one event.

mod lag;
mod logging;

pub use lag::{LagSink, LagTracker, LagUpdate};
pub use logging::LoggingHandler;

use crate::isolate::isolate;
use crate::store::{ConsumerOffset, OffsetStore, TopicPartitionOffset};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, warn};

/// Event families a handler subscribes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    /// First-seen consumer groups
    pub consumers: bool,
    /// Commits of every consumer group
    pub consumer_commits: bool,
    /// First-seen topics
    pub topics: bool,
    /// High-water mark changes of every topic
    pub topic_updates: bool,
}

impl Interest {
    /// Every event family
    pub fn all() -> Self {
        Self {
            consumers: true,
            consumer_commits: true,
            topics: true,
            topic_updates: true,
        }
    }

    /// No events
    pub fn none() -> Self {
        Self {
            consumers: false,
            consumer_commits: false,
            topics: false,
            topic_updates: false,
        }
    }
}

/// Hooks invoked with store events
///
/// Hooks run on whichever thread recorded the change, so they should return
/// quickly.
pub trait Handler: Send + Sync + 'static {
    /// Name used in logs
    fn name(&self) -> &str {
        "handler"
    }

    /// Event families to subscribe to
    fn interest(&self) -> Interest {
        Interest::all()
    }

    /// Called once at launch, before any event hook
    fn initialize(&self, _store: &OffsetStore) {}

    /// A consumer group was seen for the first time
    fn on_new_consumer(&self, _group_id: &str) {}

    /// A topic was seen for the first time
    fn on_new_topic(&self, _topic: &str) {}

    /// A consumer group committed an offset
    fn on_consumer_commit(&self, _commit: &ConsumerOffset) {}

    /// A partition's high-water mark changed
    fn on_topic_update(&self, _update: &TopicPartitionOffset) {}
}

/// A handler attached to a store
pub struct Plugin {
    handler: Arc<dyn Handler>,
    launched: AtomicBool,
}

impl Plugin {
    /// Wrap a handler
    pub fn new(handler: Arc<dyn Handler>) -> Self {
        Self {
            handler,
            launched: AtomicBool::new(false),
        }
    }

    /// Name of the wrapped handler
    pub fn name(&self) -> &str {
        self.handler.name()
    }

    /// Initialize the handler and subscribe it to `store`. Launching twice is
    /// a no-op.
    pub fn launch(&self, store: &Arc<OffsetStore>) {
        if self.launched.swap(true, Ordering::AcqRel) {
            warn!("Plugin {} already launched", self.name());
            return;
        }

        let handler = self.handler.clone();
        invoke(&*handler, "initialize", || handler.initialize(store));

        let attached = Arc::new(Attached {
            handler: self.handler.clone(),
            interest: self.handler.interest(),
            store: Arc::downgrade(store),
            consumers: Mutex::new(HashSet::new()),
            topics: Mutex::new(HashSet::new()),
        });
        let interest = attached.interest;

        // Subscribe before replaying so nothing falls between the two
        if interest.consumers || interest.consumer_commits {
            let subscriber = attached.clone();
            store.on_new_consumer(move |group_id| subscriber.consumer_seen(group_id));
        }
        if interest.topics || interest.topic_updates {
            let subscriber = attached.clone();
            store.on_new_topic(move |topic| subscriber.topic_seen(topic));
        }

        if interest.consumers || interest.consumer_commits {
            for group_id in store.known_consumers() {
                attached.consumer_seen(&group_id);
            }
        }
        if interest.topics || interest.topic_updates {
            for topic in store.known_topics() {
                attached.topic_seen(&topic);
            }
        }
        debug!("Plugin {} launched", self.name());
    }
}

struct Attached {
    handler: Arc<dyn Handler>,
    interest: Interest,
    store: Weak<OffsetStore>,
    consumers: Mutex<HashSet<String>>,
    topics: Mutex<HashSet<String>>,
}

impl Attached {
    fn consumer_seen(&self, group_id: &str) {
        if !self.consumers.lock().insert(group_id.to_string()) {
            return;
        }
        if self.interest.consumers {
            invoke(&*self.handler, "on_new_consumer", || {
                self.handler.on_new_consumer(group_id)
            });
        }
        if self.interest.consumer_commits {
            let Some(store) = self.store.upgrade() else {
                return;
            };
            let handler = self.handler.clone();
            store.on_consumer_commit(group_id, move |commit| {
                invoke(&*handler, "on_consumer_commit", || {
                    handler.on_consumer_commit(commit)
                });
            });
        }
    }

    fn topic_seen(&self, topic: &str) {
        if !self.topics.lock().insert(topic.to_string()) {
            return;
        }
        if self.interest.topics {
            invoke(&*self.handler, "on_new_topic", || self.handler.on_new_topic(topic));
        }
        if self.interest.topic_updates {
            let Some(store) = self.store.upgrade() else {
                return;
            };
            let handler = self.handler.clone();
            store.on_topic_update(topic, move |update| {
                invoke(&*handler, "on_topic_update", || handler.on_topic_update(update));
            });
        }
    }
}

fn invoke(handler: &dyn Handler, hook: &str, f: impl FnOnce()) {
    if let Err(panic) = isolate(f) {
        error!("Handler {} failed in {}: {}", handler.name(), hook, panic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct Recorder {
        interest: Option<Interest>,
        events: Mutex<Vec<String>>,
    }

    impl Handler for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn interest(&self) -> Interest {
            self.interest.unwrap_or_else(Interest::all)
        }

        fn initialize(&self, store: &OffsetStore) {
            self.events
                .lock()
                .push(format!("init:{}", store.known_consumers().len()));
        }

        fn on_new_consumer(&self, group_id: &str) {
            self.events.lock().push(format!("consumer:{}", group_id));
        }

        fn on_new_topic(&self, topic: &str) {
            self.events.lock().push(format!("topic:{}", topic));
        }

        fn on_consumer_commit(&self, commit: &ConsumerOffset) {
            self.events
                .lock()
                .push(format!("commit:{}:{}", commit.group_id, commit.offset));
        }

        fn on_topic_update(&self, update: &TopicPartitionOffset) {
            self.events
                .lock()
                .push(format!("hwm:{}:{}", update.topic, update.offset));
        }
    }

    fn live_store() -> Arc<OffsetStore> {
        let store = Arc::new(OffsetStore::default());
        store.record_consumer_offset("g1", "t", 0, 1);
        store.record_topic_offset("t", 0, 5);
        store.enable_notifications();
        store
    }

    #[test]
    fn test_launch_replays_known_then_follows() {
        let store = live_store();
        let recorder = Arc::new(Recorder::default());
        Plugin::new(recorder.clone()).launch(&store);

        store.record_consumer_offset("g1", "t", 0, 2);
        store.record_consumer_offset("g2", "t", 0, 3);
        store.record_topic_offset("t", 0, 6);
        store.record_topic_offset("u", 0, 1);

        assert_eq!(
            *recorder.events.lock(),
            vec![
                "init:1",
                "consumer:g1",
                "topic:t",
                "commit:g1:2",
                "consumer:g2",
                "commit:g2:3",
                "hwm:t:6",
                "topic:u",
                "hwm:u:1",
            ]
        );
    }

    #[test]
    fn test_interest_limits_hooks() {
        let store = live_store();
        let recorder = Arc::new(Recorder {
            interest: Some(Interest {
                consumer_commits: true,
                ..Interest::none()
            }),
            ..Recorder::default()
        });
        Plugin::new(recorder.clone()).launch(&store);

        store.record_consumer_offset("g2", "t", 0, 3);
        store.record_topic_offset("t", 0, 8);
        assert_eq!(*recorder.events.lock(), vec!["init:1", "commit:g2:3"]);
    }

    #[test]
    fn test_second_launch_is_ignored() {
        let store = live_store();
        let recorder = Arc::new(Recorder::default());
        let plugin = Plugin::new(recorder.clone());
        plugin.launch(&store);
        plugin.launch(&store);

        store.record_consumer_offset("g1", "t", 0, 4);
        let commits = recorder
            .events
            .lock()
            .iter()
            .filter(|e| e.starts_with("commit:"))
            .count();
        assert_eq!(commits, 1);
    }

    struct Failing;

    impl Handler for Failing {
        fn on_consumer_commit(&self, _commit: &ConsumerOffset) {
            panic!("handler bug");
        }
    }

    #[test]
    fn test_failing_handler_does_not_affect_others() {
        let store = live_store();
        Plugin::new(Arc::new(Failing)).launch(&store);
        let recorder = Arc::new(Recorder::default());
        Plugin::new(recorder.clone()).launch(&store);

        store.record_consumer_offset("g1", "t", 0, 9);
        assert!(recorder.events.lock().contains(&"commit:g1:9".to_string()));
    }
}
