//! rdkafka-backed cluster access

use super::{LogEvent, MetadataClient, OffsetLogSource, RawRecord, TopicMetadata};
use crate::config::{TrackerConfig, ALLOWED_KAFKA_PROPS};
use crate::error::{LagError, Result};
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::error::KafkaError;
use rdkafka::{ClientConfig, Message, Offset, TopicPartitionList};
use std::time::Duration;
use tracing::{debug, info};

fn client_config(config: &TrackerConfig, group_id: &str) -> Result<ClientConfig> {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.brokers)
        .set("group.id", group_id)
        .set("enable.auto.commit", "false")
        .set("enable.auto.offset.store", "false")
        .set("auto.offset.reset", "earliest");

    for (key, value) in &config.kafka_properties {
        if !ALLOWED_KAFKA_PROPS.contains(&key.as_str()) {
            return Err(LagError::Config(format!(
                "Disallowed Kafka property '{}'. Allowed properties: {:?}",
                key, ALLOWED_KAFKA_PROPS
            )));
        }
        client_config.set(key, value);
    }
    Ok(client_config)
}

/// Reads the offset-commit log through a manually assigned [`BaseConsumer`]
pub struct KafkaOffsetLog {
    consumer: BaseConsumer,
    metadata_timeout: Duration,
}

impl KafkaOffsetLog {
    /// Create a reader. Nothing is consumed until [`OffsetLogSource::subscribe`].
    pub fn new(config: &TrackerConfig, group_id: &str) -> Result<Self> {
        let consumer: BaseConsumer = client_config(config, group_id)?
            .set("enable.partition.eof", "true")
            .create()?;
        debug!("Created offset log consumer with group id {}", group_id);
        Ok(Self {
            consumer,
            metadata_timeout: config.metadata_timeout(),
        })
    }
}

impl OffsetLogSource for KafkaOffsetLog {
    fn subscribe(&mut self, topic: &str) -> Result<Vec<i32>> {
        let metadata = self
            .consumer
            .fetch_metadata(Some(topic), self.metadata_timeout)?;
        let partitions: Vec<i32> = metadata
            .topics()
            .iter()
            .filter(|t| t.name() == topic)
            .flat_map(|t| t.partitions().iter().map(|p| p.id()))
            .collect();
        if partitions.is_empty() {
            return Err(LagError::Cluster(format!("topic {} has no partitions", topic)));
        }

        // Assigned rather than subscribed: no group membership, always from the start
        let mut assignment = TopicPartitionList::new();
        for partition in &partitions {
            assignment.add_partition_offset(topic, *partition, Offset::Beginning)?;
        }
        self.consumer.assign(&assignment)?;
        info!("Reading {} partitions of {}", partitions.len(), topic);
        Ok(partitions)
    }

    fn poll(&mut self, timeout: Duration) -> Option<Result<LogEvent>> {
        match self.consumer.poll(timeout)? {
            Ok(message) => Some(Ok(LogEvent::Record(RawRecord {
                partition: message.partition(),
                offset: message.offset(),
                key: message.key().map(<[u8]>::to_vec),
                value: message.payload().map(<[u8]>::to_vec),
            }))),
            Err(KafkaError::PartitionEOF(partition)) => Some(Ok(LogEvent::EndOfPartition(partition))),
            Err(e) => Some(Err(e.into())),
        }
    }
}

/// Metadata and watermark queries through a [`BaseConsumer`]
pub struct KafkaMetadataClient {
    consumer: BaseConsumer,
    metadata_timeout: Duration,
    query_timeout: Duration,
}

impl KafkaMetadataClient {
    /// Create a client
    pub fn new(config: &TrackerConfig, group_id: &str) -> Result<Self> {
        let consumer: BaseConsumer = client_config(config, group_id)?.create()?;
        Ok(Self {
            consumer,
            metadata_timeout: config.metadata_timeout(),
            query_timeout: config.query_timeout(),
        })
    }

    /// Create `count` clients, one per pooled connection
    pub fn connect_many(config: &TrackerConfig, group_id: &str, count: usize) -> Result<Vec<Self>> {
        (0..count).map(|_| Self::new(config, group_id)).collect()
    }
}

impl MetadataClient for KafkaMetadataClient {
    fn fetch_topics(&self) -> Result<Vec<TopicMetadata>> {
        let metadata = self.consumer.fetch_metadata(None, self.metadata_timeout)?;
        Ok(metadata
            .topics()
            .iter()
            .filter(|t| t.error().is_none())
            .map(|t| TopicMetadata {
                name: t.name().to_string(),
                partitions: t.partitions().len(),
            })
            .collect())
    }

    fn high_watermark(&self, topic: &str, partition: i32) -> Result<u64> {
        let (_, high) = self
            .consumer
            .fetch_watermarks(topic, partition, self.query_timeout)?;
        u64::try_from(high).map_err(|_| {
            LagError::Cluster(format!(
                "invalid high watermark {} for {}/{}",
                high, topic, partition
            ))
        })
    }
}
