//! Utility modules for the shard agent.

pub mod errors;
pub mod logger;

pub use errors::{AgentError, Result};
