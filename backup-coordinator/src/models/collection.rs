//! Cluster topology as seen by the coordinator.

use serde::{Deserialize, Serialize};
use shard_agent::ShardId;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionState {
    Active,
    /// Shards are being restored; not servable
    Restoring,
    /// A restore aborted; not servable
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaRef {
    pub replica_id: String,
    pub node: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardPlacement {
    pub shard_id: ShardId,
    pub leader: ReplicaRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub state: CollectionState,
    pub shards: Vec<ShardPlacement>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl CollectionInfo {
    pub fn is_servable(&self) -> bool {
        self.state == CollectionState::Active
    }
}

/// Assign shards round-robin over the given nodes, in shard id order.
/// `None` when there are no nodes to place on.
pub fn place_round_robin(shard_ids: &[ShardId], nodes: &[String]) -> Option<Vec<ShardPlacement>> {
    if nodes.is_empty() {
        return None;
    }
    let mut nodes = nodes.to_vec();
    nodes.sort();
    let mut shard_ids = shard_ids.to_vec();
    shard_ids.sort();

    Some(
        shard_ids
            .into_iter()
            .enumerate()
            .map(|(i, shard_id)| ShardPlacement {
                shard_id,
                leader: ReplicaRef {
                    replica_id: format!("core_node{}", i + 1),
                    node: nodes[i % nodes.len()].clone(),
                },
            })
            .collect(),
    )
}
