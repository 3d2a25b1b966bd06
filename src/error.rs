//! Error types for jobhost.

use crate::stream::CommandCode;

/// Top-level error type for the node.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Job lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {id} is already registered")]
    DuplicateJobId { id: u64 },

    #[error("No job handler for command {code}")]
    UnknownCommand { code: CommandCode },

    #[error("A handler for command {code} is already registered")]
    DuplicateHandler { code: CommandCode },

    #[error("Command {code} is handled by the node and cannot run as a job")]
    ReservedCommand { code: CommandCode },

    #[error("Maximum concurrent jobs ({max}) exceeded")]
    MaxJobsExceeded { max: usize },

    #[error("Failed to spawn worker for job {id}: {reason}")]
    SpawnFailed { id: u64, reason: String },

    #[error("Invalid input for job {id}: {reason}")]
    InvalidInput { id: u64, reason: String },

    #[error("Job {id} failed: {reason}")]
    ExecutionFailed { id: u64, reason: String },

    #[error("Job {id} was cancelled")]
    Cancelled { id: u64 },
}

/// Stream encoding and payload errors.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Failed to decode stream: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Failed to encode stream: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Missing payload field: {0}")]
    MissingField(String),
}

/// Result type alias for the node.
pub type Result<T> = std::result::Result<T, Error>;
