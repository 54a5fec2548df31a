//! Application lifecycle

use crate::cluster::{MetadataClient, OffsetLogSource};
use crate::config::TrackerConfig;
use crate::error::{LagError, Result};
use crate::plugin::{Handler, Plugin};
use crate::pool::WorkerPool;
use crate::reader::{ConsumerOffsetReader, ReaderState, TopicOffsetReader};
use crate::store::OffsetStore;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info};

/// Wires the store, both readers and the plugins together
///
/// The topic reader's cold start and the offset log reader each run on their
/// own thread. Once the offset log has been caught up, store notifications
/// are enabled and every registered plugin is launched.
pub struct Application<S, C> {
    store: Arc<OffsetStore>,
    notification_pool: Arc<WorkerPool>,
    consumer_reader: Arc<ConsumerOffsetReader<S>>,
    topic_reader: Arc<TopicOffsetReader<C>>,
    plugins: Mutex<Vec<Arc<Plugin>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl<S, C> Application<S, C>
where
    S: OffsetLogSource + 'static,
    C: MetadataClient + 'static,
{
    /// Build the application over an offset log source and a set of
    /// metadata connections
    pub fn new(config: TrackerConfig, source: S, connections: Vec<C>) -> Result<Self> {
        config.validate().map_err(LagError::Config)?;

        let store = Arc::new(OffsetStore::new(config.store_cooldown()));
        let notification_pool = Arc::new(WorkerPool::new(
            "lagwatch-notify",
            config.notification_threads,
            Some(config.max_pending_notifications),
        )?);
        let consumer_reader = Arc::new(ConsumerOffsetReader::new(
            source,
            store.clone(),
            notification_pool.clone(),
            &config,
        ));
        let topic_reader = Arc::new(TopicOffsetReader::new(
            store.clone(),
            connections,
            consumer_reader.clone(),
            &config,
        )?);

        Ok(Self {
            store,
            notification_pool,
            consumer_reader,
            topic_reader,
            plugins: Mutex::new(Vec::new()),
            threads: Mutex::new(Vec::new()),
        })
    }

    /// Register a handler, launched once the offset log is caught up
    pub fn add_handler(&self, handler: Arc<dyn Handler>) {
        self.plugins.lock().push(Arc::new(Plugin::new(handler)));
    }

    /// The shared store
    pub fn store(&self) -> &Arc<OffsetStore> {
        &self.store
    }

    /// The topic high-water mark reader
    pub fn topic_reader(&self) -> &TopicOffsetReader<C> {
        &self.topic_reader
    }

    /// Whether the offset log has been caught up
    pub fn is_caught_up(&self) -> bool {
        self.consumer_reader.state() == ReaderState::Live
    }

    /// Start both readers in the background.
    ///
    /// The offset-commit log is subscribed on the calling thread, so a cluster
    /// that cannot be reached fails here instead of in the background.
    pub fn start(&self) -> Result<()> {
        let mut threads = self.threads.lock();
        if !threads.is_empty() {
            return Err(LagError::Config("application already started".to_string()));
        }
        self.consumer_reader.subscribe()?;

        let topic_reader = self.topic_reader.clone();
        threads.push(
            thread::Builder::new()
                .name("lagwatch-topics".to_string())
                .spawn(move || {
                    if let Err(e) = topic_reader.start() {
                        error!("Topic offset reader failed to start: {}", e);
                    }
                })?,
        );

        let consumer_reader = self.consumer_reader.clone();
        let store = self.store.clone();
        let plugins = self.plugins.lock().clone();
        threads.push(
            thread::Builder::new()
                .name("lagwatch-commits".to_string())
                .spawn(move || {
                    let result = consumer_reader.run(|| {
                        store.enable_notifications();
                        for plugin in &plugins {
                            plugin.launch(&store);
                        }
                        info!("Launched {} plugins", plugins.len());
                    });
                    if let Err(e) = result {
                        error!("Offset log reader failed: {}", e);
                    }
                })?,
        );

        info!("Lag tracker started");
        Ok(())
    }

    /// Stop both readers and wait for their threads
    pub fn stop(&self) {
        info!("Stopping lag tracker");
        self.consumer_reader.stop();
        self.topic_reader.stop();
        self.notification_pool.stop();

        let threads = std::mem::take(&mut *self.threads.lock());
        for handle in threads {
            if handle.join().is_err() {
                error!("Reader thread terminated abnormally");
            }
        }
        info!("Lag tracker stopped");
    }
}
