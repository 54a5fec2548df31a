//! Error types for the lag tracker

use crate::scheduler::TaskId;
use std::io;
use thiserror::Error;

/// Result type alias for lag tracker operations
pub type Result<T> = std::result::Result<T, LagError>;

/// Main error type for lag tracker operations
#[derive(Error, Debug)]
pub enum LagError {
    /// Configuration is invalid or incomplete
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A record from the offset-commit log could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Communication with the cluster failed
    #[error("Cluster error: {0}")]
    Cluster(String),

    /// A cluster request did not complete in time
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A scheduler operation referenced a task that does not exist
    #[error("Task not found: {0}")]
    UnknownTask(TaskId),

    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// YAML configuration parsing failed
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Kafka client errors
    #[cfg(feature = "kafka")]
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
}

impl LagError {
    /// Check if the failed operation may succeed on a later attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            LagError::Cluster(_) | LagError::Timeout(_) => true,
            #[cfg(feature = "kafka")]
            LagError::Kafka(e) => !matches!(e, rdkafka::error::KafkaError::ClientCreation(_)),
            _ => false,
        }
    }

    /// Get error severity
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            LagError::Decode(_) => ErrorSeverity::Warning,
            LagError::Cluster(_) | LagError::Timeout(_) => ErrorSeverity::Error,
            LagError::Config(_) | LagError::UnknownTask(_) => ErrorSeverity::Fatal,
            _ => ErrorSeverity::Error,
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// A single record was discarded; processing continues
    Warning,
    /// A unit of work failed and will be retried on its next natural schedule
    Error,
    /// Contract violation or unusable setup
    Fatal,
}

/// Failure to decode a record from the internal offset-commit log
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The record has no key, so its schema cannot be determined
    #[error("record has no key")]
    MissingKey,

    /// The buffer ended before the field could be read
    #[error("buffer underrun while reading {field}")]
    Truncated {
        /// Field being read
        field: &'static str,
    },

    /// A string field is not valid UTF-8
    #[error("invalid UTF-8 in {field}")]
    InvalidUtf8 {
        /// Field being read
        field: &'static str,
    },

    /// The key parsed as an offset commit but the value schema is unknown
    #[error("unsupported value schema version {0}")]
    UnsupportedValueVersion(u16),
}
