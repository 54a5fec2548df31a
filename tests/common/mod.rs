//! In-memory cluster fakes and wire-format encoders shared by integration tests

#![allow(dead_code)]

use lagwatch::cluster::{LogEvent, MetadataClient, OffsetLogSource, RawRecord, TopicMetadata};
use lagwatch::{LagError, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Encode an offset-commit key
pub fn commit_key(version: u16, group_id: &str, topic: &str, partition: i32) -> Vec<u8> {
    let mut out = version.to_be_bytes().to_vec();
    out.extend((group_id.len() as u16).to_be_bytes());
    out.extend(group_id.as_bytes());
    out.extend((topic.len() as u16).to_be_bytes());
    out.extend(topic.as_bytes());
    out.extend(partition.to_be_bytes());
    out
}

/// Encode an offset-commit value
pub fn commit_value(version: u16, offset: u64) -> Vec<u8> {
    let mut out = version.to_be_bytes().to_vec();
    out.extend(offset.to_be_bytes());
    out.extend(0u16.to_be_bytes());
    out.extend(0i64.to_be_bytes());
    out
}

/// A v1 commit record as read from offset log partition 0
pub fn commit(group_id: &str, topic: &str, partition: i32, offset: u64) -> LogEvent {
    LogEvent::Record(RawRecord {
        partition: 0,
        offset: 0,
        key: Some(commit_key(1, group_id, topic, partition)),
        value: Some(commit_value(1, offset)),
    })
}

/// A record with arbitrary bytes
pub fn raw(key: Option<Vec<u8>>, value: Option<Vec<u8>>) -> LogEvent {
    LogEvent::Record(RawRecord {
        partition: 0,
        offset: 0,
        key,
        value,
    })
}

#[derive(Default)]
struct LogState {
    partitions: Vec<i32>,
    events: VecDeque<LogEvent>,
    subscribe_error: Option<String>,
    subscribed: Option<String>,
}

/// Offset log fed by the test through a [`FakeLogHandle`]
pub struct FakeOffsetLog {
    state: Arc<Mutex<LogState>>,
}

/// Test-side handle of a [`FakeOffsetLog`]
#[derive(Clone)]
pub struct FakeLogHandle {
    state: Arc<Mutex<LogState>>,
}

impl FakeOffsetLog {
    pub fn new(partitions: Vec<i32>) -> (Self, FakeLogHandle) {
        let state = Arc::new(Mutex::new(LogState {
            partitions,
            ..LogState::default()
        }));
        (
            Self {
                state: state.clone(),
            },
            FakeLogHandle { state },
        )
    }
}

impl FakeLogHandle {
    pub fn push(&self, event: LogEvent) {
        self.state.lock().events.push_back(event);
    }

    pub fn end_of_partitions(&self, partitions: &[i32]) {
        let mut state = self.state.lock();
        for partition in partitions {
            state.events.push_back(LogEvent::EndOfPartition(*partition));
        }
    }

    pub fn fail_subscribe(&self, message: &str) {
        self.state.lock().subscribe_error = Some(message.to_string());
    }

    pub fn subscribed_topic(&self) -> Option<String> {
        self.state.lock().subscribed.clone()
    }

    pub fn pending(&self) -> usize {
        self.state.lock().events.len()
    }
}

impl OffsetLogSource for FakeOffsetLog {
    fn subscribe(&mut self, topic: &str) -> Result<Vec<i32>> {
        let mut state = self.state.lock();
        if let Some(message) = &state.subscribe_error {
            return Err(LagError::Cluster(message.clone()));
        }
        state.subscribed = Some(topic.to_string());
        Ok(state.partitions.clone())
    }

    fn poll(&mut self, timeout: Duration) -> Option<Result<LogEvent>> {
        if let Some(event) = self.state.lock().events.pop_front() {
            return Some(Ok(event));
        }
        thread::sleep(timeout.min(Duration::from_millis(5)));
        None
    }
}

#[derive(Default)]
struct ClusterState {
    topics: Vec<TopicMetadata>,
    high_watermarks: HashMap<(String, i32), u64>,
    failing: HashSet<(String, i32)>,
    metadata_error: bool,
    queries: HashMap<(String, i32), usize>,
}

/// In-memory cluster; clones share state and act as separate connections
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_topic(&self, name: &str, partitions: usize, high_watermark: u64) {
        let mut state = self.state.lock();
        state.topics.push(TopicMetadata {
            name: name.to_string(),
            partitions,
        });
        for partition in 0..partitions as i32 {
            state
                .high_watermarks
                .insert((name.to_string(), partition), high_watermark);
        }
    }

    pub fn set_high_watermark(&self, topic: &str, partition: i32, offset: u64) {
        self.state
            .lock()
            .high_watermarks
            .insert((topic.to_string(), partition), offset);
    }

    pub fn fail_queries(&self, topic: &str, partition: i32, fail: bool) {
        let mut state = self.state.lock();
        let key = (topic.to_string(), partition);
        if fail {
            state.failing.insert(key);
        } else {
            state.failing.remove(&key);
        }
    }

    pub fn fail_metadata(&self, fail: bool) {
        self.state.lock().metadata_error = fail;
    }

    pub fn query_count(&self, topic: &str, partition: i32) -> usize {
        self.state
            .lock()
            .queries
            .get(&(topic.to_string(), partition))
            .copied()
            .unwrap_or(0)
    }

    pub fn connections(&self, count: usize) -> Vec<FakeCluster> {
        (0..count).map(|_| self.clone()).collect()
    }
}

impl MetadataClient for FakeCluster {
    fn fetch_topics(&self) -> Result<Vec<TopicMetadata>> {
        let state = self.state.lock();
        if state.metadata_error {
            return Err(LagError::Timeout("metadata request timed out".to_string()));
        }
        Ok(state.topics.clone())
    }

    fn high_watermark(&self, topic: &str, partition: i32) -> Result<u64> {
        let mut state = self.state.lock();
        let key = (topic.to_string(), partition);
        *state.queries.entry(key.clone()).or_insert(0) += 1;
        if state.failing.contains(&key) {
            return Err(LagError::Cluster(format!("broker unavailable for {}/{}", topic, partition)));
        }
        state
            .high_watermarks
            .get(&key)
            .copied()
            .ok_or_else(|| LagError::Cluster(format!("unknown partition {}/{}", topic, partition)))
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
