//! Configuration management for the shard agent.
//!
//! Loads configuration from a TOML file; command-line flags override it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::executor::DEFAULT_COPY_BUDGET;
use crate::repository::RepositoryConfig;
use crate::utils::errors::{AgentError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub agent: AgentConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
    /// Backup repositories this node can copy through
    #[serde(default, rename = "repository")]
    pub repositories: Vec<RepositoryConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Node identifier, matching the node id in the cluster topology
    #[serde(default = "default_node_id")]
    pub id: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Root of the node's shard index directories
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Semaphore permits per shard task; see `executor::copy_weight`
    #[serde(default = "default_copy_budget")]
    pub copy_budget: usize,
}

fn default_node_id() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "shard-agent-01".to_string())
}

fn default_port() -> u16 {
    9990
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_copy_budget() -> usize {
    DEFAULT_COPY_BUDGET
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            copy_budget: default_copy_budget(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            agent: AgentConfig {
                id: default_node_id(),
                port: default_port(),
                data_dir: PathBuf::from("/var/lib/shard-agent"),
            },
            log: LogConfig::default(),
            performance: PerformanceConfig::default(),
            repositories: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| AgentError::Config(e.to_string()))
    }
}
