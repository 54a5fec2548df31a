use super::CommitWatch;
use crate::cluster::MetadataClient;
use crate::config::TrackerConfig;
use crate::error::Result;
use crate::pool::{ConnectionPool, TaskGroup, WorkerPool};
use crate::scheduler::{TaskId, TaskScheduler};
use crate::store::{ConsumerOffset, OffsetStore, TopicPartition};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

struct Inner<C> {
    store: Arc<OffsetStore>,
    connections: ConnectionPool<C>,
    query_pool: WorkerPool,
    scheduler: TaskScheduler,
    commits: Arc<dyn CommitWatch>,
    tasks: Mutex<HashMap<TopicPartition, TaskId>>,
    running: AtomicBool,
    poll_period: Duration,
    refresh_period: Duration,
    commit_priority: f64,
    include_internal_topics: bool,
}

/// Keeps high-water marks of every partition in the store fresh
///
/// Each partition is a recurring scheduler task whose priority is raised
/// whenever a commit on it is observed, so active partitions are polled more
/// often than idle ones.
pub struct TopicOffsetReader<C> {
    inner: Arc<Inner<C>>,
}

impl<C: MetadataClient + 'static> TopicOffsetReader<C> {
    /// Create a reader over pre-built `connections`. Nothing is queried until
    /// [`start`](Self::start).
    pub fn new(
        store: Arc<OffsetStore>,
        connections: Vec<C>,
        commits: Arc<dyn CommitWatch>,
        config: &TrackerConfig,
    ) -> Result<Self> {
        let inner = Inner {
            store,
            connections: ConnectionPool::new(connections)?,
            query_pool: WorkerPool::new(
                "lagwatch-query",
                config.query_threads,
                Some(config.max_pending_queries),
            )?,
            scheduler: TaskScheduler::new(config.scheduler_config())?,
            commits,
            tasks: Mutex::new(HashMap::new()),
            running: AtomicBool::new(true),
            poll_period: config.topic_poll_period(),
            refresh_period: config.metadata_refresh_period(),
            commit_priority: config.commit_priority,
            include_internal_topics: config.include_internal_topics,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Cold start: discover partitions, query all of them and wait for the
    /// results, then hand every partition to the scheduler.
    ///
    /// A metadata failure here is logged; the periodic refresh retries it.
    pub fn start(&self) -> Result<()> {
        let inner = &self.inner;
        let partitions = match inner.discover() {
            Ok(partitions) => partitions,
            Err(e) => {
                error!("Failed to load topic metadata: {}", e);
                Vec::new()
            }
        };
        info!("Discovered {} topic partitions", partitions.len());

        let group = TaskGroup::new();
        for topic_partition in &partitions {
            loop {
                if !inner.running.load(Ordering::Acquire) {
                    return Ok(());
                }
                let weak = Arc::downgrade(inner);
                let target = topic_partition.clone();
                let submitted = group.submit(&inner.query_pool, move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.query(&target);
                    }
                });
                if submitted {
                    break;
                }
                // queue full; let the fan-out drain before continuing
                group.wait();
            }
        }
        group.wait();
        if !inner.running.load(Ordering::Acquire) {
            return Ok(());
        }
        info!("Loaded high watermarks of {} partitions", partitions.len());

        for topic_partition in partitions {
            Inner::register(inner, topic_partition);
        }

        let weak = Arc::downgrade(inner);
        inner.scheduler.add_task(
            move || {
                if let Some(inner) = weak.upgrade() {
                    Inner::refresh(&inner);
                }
            },
            inner.refresh_period,
        );
        Ok(())
    }

    /// Stop scheduling queries. A query that is running completes.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.inner.scheduler.stop();
        self.inner.query_pool.stop();
        info!("Topic offset reader stopped");
    }

    /// Partitions currently scheduled
    pub fn tracked_partitions(&self) -> Vec<TopicPartition> {
        let mut partitions: Vec<_> = self.inner.tasks.lock().keys().cloned().collect();
        partitions.sort();
        partitions
    }

    /// Scheduler task polling a partition
    pub fn task_id(&self, topic_partition: &TopicPartition) -> Option<TaskId> {
        self.inner.tasks.lock().get(topic_partition).copied()
    }

    /// The scheduler driving the polls
    pub fn scheduler(&self) -> &TaskScheduler {
        &self.inner.scheduler
    }
}

impl<C: MetadataClient + 'static> Inner<C> {
    fn discover(&self) -> Result<Vec<TopicPartition>> {
        let topics = self.connections.with_connection(|client| client.fetch_topics())?;
        let include_internal = self.include_internal_topics;
        Ok(topics
            .into_iter()
            .filter(|topic| include_internal || !topic.name.starts_with("__"))
            .flat_map(|topic| {
                let count = i32::try_from(topic.partitions).unwrap_or(i32::MAX);
                (0..count).map(move |partition| TopicPartition::new(topic.name.clone(), partition))
            })
            .collect())
    }

    fn query(&self, topic_partition: &TopicPartition) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        let result = self.connections.with_connection(|client| {
            client.high_watermark(&topic_partition.topic, topic_partition.partition)
        });
        match result {
            Ok(offset) => self.store.record_topic_offset(
                &topic_partition.topic,
                topic_partition.partition,
                offset,
            ),
            Err(e) => error!("Failed to query high watermark of {}: {}", topic_partition, e),
        }
    }

    fn submit_query(this: &Arc<Self>, topic_partition: TopicPartition) {
        let weak = Arc::downgrade(this);
        let target = topic_partition.clone();
        let submitted = this.query_pool.submit(move || {
            if let Some(inner) = weak.upgrade() {
                inner.query(&target);
            }
        });
        if !submitted && this.running.load(Ordering::Acquire) {
            warn!("Query queue full, skipping poll of {}", topic_partition);
        }
    }

    /// Schedule `topic_partition` and watch its commits. Returns `false` if it
    /// was already registered.
    fn register(this: &Arc<Self>, topic_partition: TopicPartition) -> bool {
        let mut tasks = this.tasks.lock();
        if tasks.contains_key(&topic_partition) {
            return false;
        }

        let weak: Weak<Self> = Arc::downgrade(this);
        let target = topic_partition.clone();
        let task_id = this.scheduler.add_task(
            move || {
                if let Some(inner) = weak.upgrade() {
                    Inner::submit_query(&inner, target.clone());
                }
            },
            this.poll_period,
        );

        let weak = Arc::downgrade(this);
        this.commits.watch_commits(
            topic_partition.clone(),
            Box::new(move |_commit: &ConsumerOffset| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if let Err(e) = inner.scheduler.set_priority(task_id, inner.commit_priority) {
                    error!("Failed to raise priority of task {}: {}", task_id, e);
                }
            }),
        );
        debug!("Tracking {} as task {}", topic_partition, task_id);
        tasks.insert(topic_partition, task_id);
        true
    }

    fn refresh(this: &Arc<Self>) {
        let partitions = match this.discover() {
            Ok(partitions) => partitions,
            Err(e) => {
                error!("Failed to refresh topic metadata: {}", e);
                return;
            }
        };

        let mut added = 0;
        for topic_partition in partitions {
            if Inner::register(this, topic_partition.clone()) {
                Inner::submit_query(this, topic_partition);
                added += 1;
            }
        }
        if added > 0 {
            info!("Tracking {} new topic partitions", added);
        }
    }
}
