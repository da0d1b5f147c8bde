//! Custom error types for the shard agent.

use thiserror::Error;

use crate::repository::RepositoryError;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Index directory not found: {0}")]
    IndexNotFound(String),

    #[error("Index directory already exists: {0}")]
    IndexExists(String),

    #[error("Checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("Length mismatch for {file}: expected {expected} bytes, got {actual}")]
    LengthMismatch { file: String, expected: u64, actual: u64 },

    #[error("Task cancelled")]
    Cancelled,

    #[error("Task error: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;
