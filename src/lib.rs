//! Consumer lag tracking for Kafka-compatible clusters
//!
//! The tracker follows two positions for every topic-partition: the offsets
//! consumer groups commit, read from the internal offset-commit log, and the
//! high-water mark, polled from the cluster. Partitions with recent commit
//! activity are polled more often than idle ones.
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "kafka")]
//! # fn example() -> lagwatch::Result<()> {
//! use lagwatch::cluster::{KafkaMetadataClient, KafkaOffsetLog};
//! use lagwatch::plugin::LagTracker;
//! use lagwatch::{Application, TrackerConfig};
//! use std::sync::Arc;
//!
//! let config = TrackerConfig::builder().brokers("localhost:9092").build();
//! let group_id = config.reader_group_id();
//! let source = KafkaOffsetLog::new(&config, &group_id)?;
//! let connections = KafkaMetadataClient::connect_many(&config, &group_id, config.connection_count)?;
//!
//! let app = Application::new(config, source, connections)?;
//! app.add_handler(Arc::new(LagTracker::logging()));
//! app.start()?;
//! # app.stop();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]

pub use app::Application;
pub use config::TrackerConfig;
pub use error::{DecodeError, ErrorSeverity, LagError, Result};
pub use store::{ConsumerOffset, OffsetStore, TopicPartition, TopicPartitionOffset};

/// Application lifecycle
pub mod app;

/// Cluster access traits and clients
pub mod cluster;

/// Offset-commit log record decoding
pub mod codec;

/// Configuration
pub mod config;

/// Error types
pub mod error;

mod isolate;

/// Debounced observers
pub mod observer;

/// Plugin handlers
pub mod plugin;

/// Worker and connection pools
pub mod pool;

/// Offset readers
pub mod reader;

/// Adaptive task scheduler
pub mod scheduler;

/// Offset state store
pub mod store;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the tracing subscriber. `RUST_LOG` overrides the default
/// `info` filter.
pub fn init_tracing(json: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
