//! Shard Agent Library
//!
//! Node-side half of collection backup and restore: the pluggable backup
//! repositories, the backup manifest, the task types exchanged with the
//! coordinator, and the executor that copies one shard's index files.

pub mod api;
pub mod config;
pub mod daemon;
pub mod executor;
pub mod fs;
pub mod manifest;
pub mod repository;
pub mod task;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use executor::ShardExecutor;
pub use manifest::{BackupManifest, FileDescriptor, ShardManifest};
pub use repository::{BackupRepository, RepositoryError, RepositoryRegistry};
pub use task::{OperationResult, Outcome, ShardBackupTask, ShardId, ShardReport, ShardRestoreTask};
pub use utils::errors::AgentError;
pub type Result<T> = std::result::Result<T, AgentError>;
