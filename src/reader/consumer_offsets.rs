use super::{CommitCallback, CommitWatch};
use crate::cluster::{LogEvent, OffsetLogSource, RawRecord};
use crate::codec::{self, OffsetRecord, OFFSETS_TOPIC};
use crate::config::TrackerConfig;
use crate::error::Result;
use crate::observer::AsyncObserver;
use crate::pool::WorkerPool;
use crate::store::{ConsumerOffset, OffsetStore, TopicPartition};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Progress of a [`ConsumerOffsetReader`] through the offset-commit log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// Not yet assigned to the log
    Subscribing,
    /// Replaying history; some partitions have not reached their end
    CatchingUp,
    /// Every partition reached its end at least once
    Live,
}

/// Streams the offset-commit log into the store
///
/// Commit watches only fire once the reader is [`ReaderState::Live`], so
/// replaying history on startup does not disturb scheduling.
pub struct ConsumerOffsetReader<S> {
    source: Mutex<S>,
    store: Arc<OffsetStore>,
    watches: AsyncObserver<TopicPartition, ConsumerOffset>,
    state: Mutex<ReaderState>,
    // partitions assigned by subscribe() and not yet handed to run()
    assigned: Mutex<Option<HashSet<i32>>>,
    running: AtomicBool,
    poll_timeout: Duration,
}

impl<S: OffsetLogSource> ConsumerOffsetReader<S> {
    /// Create a reader. Commit-watch callbacks run on `notification_pool`.
    pub fn new(
        source: S,
        store: Arc<OffsetStore>,
        notification_pool: Arc<WorkerPool>,
        config: &TrackerConfig,
    ) -> Self {
        Self {
            source: Mutex::new(source),
            store,
            watches: AsyncObserver::new(notification_pool, config.commit_watch_cooldown()),
            state: Mutex::new(ReaderState::Subscribing),
            assigned: Mutex::new(None),
            running: AtomicBool::new(true),
            poll_timeout: config.poll_timeout(),
        }
    }

    /// Current state
    pub fn state(&self) -> ReaderState {
        *self.state.lock()
    }

    /// Assign the reader to the offset-commit log without reading from it.
    ///
    /// Lets a caller surface connection failures before handing
    /// [`run`](Self::run) to a background thread.
    pub fn subscribe(&self) -> Result<()> {
        let mut source = self.source.lock();
        let partitions = Self::assign(&mut *source)?;
        *self.assigned.lock() = Some(partitions);
        Ok(())
    }

    /// Read the log until [`stop`](Self::stop) is called. `on_caught_up` runs
    /// once, on this thread, when every partition has reached its end.
    ///
    /// Subscribes first unless [`subscribe`](Self::subscribe) already did.
    ///
    /// # Errors
    ///
    /// Only a failure to subscribe is returned; per-record and per-poll
    /// failures are logged and skipped.
    pub fn run<F: FnOnce()>(&self, on_caught_up: F) -> Result<()> {
        let mut source = self.source.lock();
        let assigned = self.assigned.lock().take();
        let mut pending = match assigned {
            Some(pending) => pending,
            None => Self::assign(&mut *source)?,
        };

        let mut on_caught_up = Some(on_caught_up);
        if pending.is_empty() {
            self.go_live(&mut on_caught_up);
        } else {
            *self.state.lock() = ReaderState::CatchingUp;
            info!("Catching up on {} offset log partitions", pending.len());
        }

        while self.running.load(Ordering::Acquire) {
            let Some(event) = source.poll(self.poll_timeout) else {
                continue;
            };
            match event {
                Ok(LogEvent::Record(record)) => self.handle_record(&record),
                Ok(LogEvent::EndOfPartition(partition)) => {
                    if pending.remove(&partition) && pending.is_empty() {
                        self.go_live(&mut on_caught_up);
                    }
                }
                Err(e) => warn!("Error reading offset log: {}", e),
            }
        }
        info!("Offset log reader stopped");
        Ok(())
    }

    /// Ask [`run`](Self::run) to return after its current poll
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Whether [`stop`](Self::stop) has not been called
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn assign(source: &mut S) -> Result<HashSet<i32>> {
        let partitions = source.subscribe(OFFSETS_TOPIC)?;
        debug!("Assigned {} offset log partitions", partitions.len());
        Ok(partitions.into_iter().collect())
    }

    fn go_live<F: FnOnce()>(&self, on_caught_up: &mut Option<F>) {
        *self.state.lock() = ReaderState::Live;
        info!("Offset log caught up");
        if let Some(callback) = on_caught_up.take() {
            callback();
        }
    }

    fn handle_record(&self, record: &RawRecord) {
        let commit = match codec::decode(record.key.as_deref(), record.value.as_deref()) {
            Ok(OffsetRecord::Commit(commit)) => commit,
            Ok(OffsetRecord::Tombstone(key)) => {
                trace!(
                    "Skipping tombstone for {} on {}/{}",
                    key.group_id,
                    key.topic,
                    key.partition
                );
                return;
            }
            Ok(OffsetRecord::Ignored { version }) => {
                trace!("Skipping record with key version {}", version);
                return;
            }
            Err(e) => {
                warn!(
                    "Discarding offset log record {}@{}: {}",
                    record.partition, record.offset, e
                );
                return;
            }
        };

        self.store
            .record_consumer_offset(&commit.group_id, &commit.topic, commit.partition, commit.offset);

        if self.state() == ReaderState::Live {
            let topic_partition = TopicPartition::new(commit.topic.clone(), commit.partition);
            let offset = ConsumerOffset {
                group_id: commit.group_id,
                topic: commit.topic,
                partition: commit.partition,
                offset: commit.offset,
            };
            self.watches.notify(&topic_partition, &offset);
        }
    }
}

impl<S: OffsetLogSource> CommitWatch for ConsumerOffsetReader<S> {
    fn watch_commits(&self, topic_partition: TopicPartition, callback: CommitCallback) {
        self.watches
            .observe(topic_partition, move |_: &TopicPartition, commit: &ConsumerOffset| {
                callback(commit)
            });
    }
}
