//! Reads the offset-commit log and answers consumer offset queries from stdin,
//! one group id per line.

use clap::Parser;
use lagwatch::cluster::KafkaOffsetLog;
use lagwatch::pool::WorkerPool;
use lagwatch::reader::ConsumerOffsetReader;
use lagwatch::{LagError, OffsetStore, TrackerConfig};
use std::io::{self, BufRead};
use std::sync::Arc;
use std::thread;

#[derive(Parser)]
#[command(name = "lagwatch-consumer-offsets")]
#[command(about = "Dump committed consumer offsets", long_about = None)]
struct Cli {
    /// Bootstrap brokers
    #[arg(short, long)]
    brokers: String,

    /// Group id of the reading client; random when unset
    #[arg(short, long)]
    group_id: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    lagwatch::init_tracing(false);

    let mut config = TrackerConfig::builder().brokers(cli.brokers).build();
    config.group_id = cli.group_id;
    config.validate().map_err(LagError::Config)?;

    let source = KafkaOffsetLog::new(&config, &config.reader_group_id())?;
    let store = Arc::new(OffsetStore::new(config.store_cooldown()));
    let pool = Arc::new(WorkerPool::new("lagwatch-notify", 1, Some(1))?);
    let reader = Arc::new(ConsumerOffsetReader::new(source, store.clone(), pool.clone(), &config));
    reader.subscribe()?;

    let runner = reader.clone();
    let handle = thread::Builder::new()
        .name("lagwatch-commits".to_string())
        .spawn(move || runner.run(|| println!("Reached the end of every partition")))?;

    for line in io::stdin().lock().lines() {
        let line = line?;
        let group_id = line.trim();
        if group_id.is_empty() {
            continue;
        }
        let offsets = store.consumer_offsets(group_id);
        if offsets.is_empty() {
            println!("Consumer group not found");
        }
        for offset in offsets {
            println!("{}: {}", offset.topic_partition(), offset.offset);
        }
    }

    reader.stop();
    if let Ok(result) = handle.join() {
        result?;
    }
    pool.stop();
    Ok(())
}
