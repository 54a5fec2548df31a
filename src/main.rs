use clap::Parser;
use lagwatch::cluster::{KafkaMetadataClient, KafkaOffsetLog};
use lagwatch::plugin::{LagTracker, LoggingHandler};
use lagwatch::{Application, LagError, TrackerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "lagwatch")]
#[command(about = "Track consumer group lag on a Kafka cluster", long_about = None)]
#[command(version)]
struct Cli {
    /// Bootstrap brokers; overrides the config file
    #[arg(short, long)]
    brokers: Option<String>,

    /// Path to a YAML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Threads querying high watermarks; overrides the config file
    #[arg(long)]
    query_threads: Option<usize>,

    /// Log consumer lag as it changes
    #[arg(long)]
    log_lag: bool,

    /// Log every store event
    #[arg(long)]
    log_events: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.debug && std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "lagwatch=debug,info");
    }
    lagwatch::init_tracing(cli.json_logs);

    let mut config = match &cli.config {
        Some(path) => TrackerConfig::from_yaml_file(path)?,
        None => TrackerConfig::default(),
    };
    if let Some(brokers) = cli.brokers {
        config.brokers = brokers;
    }
    if let Some(threads) = cli.query_threads {
        config.query_threads = threads;
    }
    config.validate().map_err(LagError::Config)?;

    let group_id = config.reader_group_id();
    info!("lagwatch {} reading {} as {}", lagwatch::VERSION, config.brokers, group_id);

    let source = KafkaOffsetLog::new(&config, &group_id)?;
    let connections = KafkaMetadataClient::connect_many(&config, &group_id, config.connection_count)?;
    let app = Application::new(config, source, connections)?;
    if cli.log_lag {
        app.add_handler(Arc::new(LagTracker::logging()));
    }
    if cli.log_events {
        app.add_handler(Arc::new(LoggingHandler));
    }

    app.start()?;
    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    tokio::task::spawn_blocking(move || app.stop()).await?;
    Ok(())
}
