use anyhow::Context;
use serde::Deserialize;
use shard_agent::repository::RepositoryConfig;
use shard_agent::ShardId;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::collection::{CollectionInfo, CollectionState, ReplicaRef, ShardPlacement};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub cluster_config: PathBuf,
    pub log_level: String,
    /// Upper bound on one shard task, dispatch to result
    pub task_timeout: Duration,
    pub max_concurrent_operations: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8990),
            cluster_config: PathBuf::from(
                std::env::var("CLUSTER_CONFIG").unwrap_or_else(|_| "cluster.toml".into()),
            ),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            task_timeout: Duration::from_secs(
                std::env::var("TASK_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(3600),
            ),
            max_concurrent_operations: std::env::var("MAX_CONCURRENT_OPERATIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8990,
            cluster_config: PathBuf::from("cluster.toml"),
            log_level: "info".into(),
            task_timeout: Duration::from_secs(3600),
            max_concurrent_operations: 4,
        }
    }
}

/// Static cluster topology plus the repository table.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    #[serde(default, rename = "repository")]
    pub repositories: Vec<RepositoryConfig>,
    #[serde(default, rename = "node")]
    pub nodes: Vec<NodeConfig>,
    #[serde(default, rename = "collection")]
    pub collections: Vec<CollectionConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub id: String,
    /// Base URL of the node's shard agent
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectionConfig {
    pub name: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default, rename = "shard")]
    pub shards: Vec<ShardConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShardConfig {
    pub id: String,
    /// Replica id of the shard leader
    pub replica: String,
    pub node: String,
}

impl ClusterConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read cluster config {}", path.display()))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: ClusterConfig = toml::from_str(content)?;
        for collection in &config.collections {
            for shard in &collection.shards {
                if !config.nodes.iter().any(|n| n.id == shard.node) {
                    anyhow::bail!(
                        "Shard {} of collection '{}' is placed on unknown node '{}'",
                        shard.id,
                        collection.name,
                        shard.node
                    );
                }
            }
        }
        Ok(config)
    }

    pub fn collection_infos(&self) -> Vec<CollectionInfo> {
        self.collections
            .iter()
            .map(|c| CollectionInfo {
                name: c.name.clone(),
                state: CollectionState::Active,
                shards: c
                    .shards
                    .iter()
                    .map(|s| ShardPlacement {
                        shard_id: ShardId::new(s.id.clone()),
                        leader: ReplicaRef {
                            replica_id: s.replica.clone(),
                            node: s.node.clone(),
                        },
                    })
                    .collect(),
                properties: c.properties.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLUSTER: &str = r#"
        [[repository]]
        name = "local"
        kind = "local"
        default = true
        options = { location = "/mnt/backups" }

        [[node]]
        id = "node1"
        url = "http://10.0.0.1:9990"

        [[node]]
        id = "node2"
        url = "http://10.0.0.2:9990"

        [[collection]]
        name = "books"
        properties = { configName = "books_conf" }

        [[collection.shard]]
        id = "shard1"
        replica = "core_node1"
        node = "node1"

        [[collection.shard]]
        id = "shard2"
        replica = "core_node2"
        node = "node2"
    "#;

    #[test]
    fn test_parse_cluster_config() {
        let config = ClusterConfig::from_toml(CLUSTER).unwrap();
        assert_eq!(config.repositories.len(), 1);
        assert_eq!(config.nodes.len(), 2);

        let infos = config.collection_infos();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].shards.len(), 2);
        assert_eq!(infos[0].shards[1].leader.node, "node2");
        assert_eq!(infos[0].properties["configName"], "books_conf");
        assert!(infos[0].is_servable());
    }

    #[test]
    fn test_unknown_node_rejected() {
        let bad = r#"
            [[collection]]
            name = "books"

            [[collection.shard]]
            id = "shard1"
            replica = "core_node1"
            node = "ghost"
        "#;
        let err = ClusterConfig::from_toml(bad).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }
}
