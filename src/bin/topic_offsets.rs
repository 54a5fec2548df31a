//! Polls high-water marks and answers queries from stdin, one
//! `<topic> <partition>` pair per line.

use clap::Parser;
use lagwatch::cluster::KafkaMetadataClient;
use lagwatch::reader::{CommitCallback, CommitWatch, TopicOffsetReader};
use lagwatch::store::TopicPartition;
use lagwatch::{LagError, OffsetStore, TrackerConfig};
use std::io::{self, BufRead};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "lagwatch-topic-offsets")]
#[command(about = "Dump topic high-water marks", long_about = None)]
struct Cli {
    /// Bootstrap brokers
    #[arg(short, long)]
    brokers: String,

    /// Group id of the querying clients; random when unset
    #[arg(short, long)]
    group_id: Option<String>,

    /// Number of metadata connections
    #[arg(long, default_value_t = 2)]
    connections: usize,
}

/// Without the commit log every partition keeps its base period
struct NoCommits;

impl CommitWatch for NoCommits {
    fn watch_commits(&self, _topic_partition: TopicPartition, _callback: CommitCallback) {}
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    lagwatch::init_tracing(false);

    let mut config = TrackerConfig::builder()
        .brokers(cli.brokers)
        .connection_count(cli.connections)
        .build();
    config.group_id = cli.group_id;
    config.validate().map_err(LagError::Config)?;

    let group_id = config.reader_group_id();
    let connections = KafkaMetadataClient::connect_many(&config, &group_id, config.connection_count)?;
    let store = Arc::new(OffsetStore::default());
    let reader = TopicOffsetReader::new(store.clone(), connections, Arc::new(NoCommits), &config)?;
    reader.start()?;
    println!("Loaded {} partitions", reader.tracked_partitions().len());

    for line in io::stdin().lock().lines() {
        let line = line?;
        let mut fields = line.split_whitespace();
        let (Some(topic), Some(partition)) = (fields.next(), fields.next()) else {
            continue;
        };
        let Ok(partition) = partition.parse::<i32>() else {
            println!("Invalid partition {}", partition);
            continue;
        };
        match store.topic_offset(topic, partition) {
            Some(offset) => println!("Offset for {}: {}", TopicPartition::new(topic, partition), offset),
            None => println!("Topic/partition not found"),
        }
    }

    reader.stop();
    Ok(())
}
