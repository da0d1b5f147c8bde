//! Read and update the cluster's collection table.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::models::collection::{CollectionInfo, CollectionState};

#[async_trait]
pub trait ClusterState: Send + Sync {
    async fn collection(&self, name: &str) -> anyhow::Result<Option<CollectionInfo>>;

    /// Nodes currently able to host shards.
    async fn live_nodes(&self) -> anyhow::Result<Vec<String>>;

    /// Register a collection. `false` if the name is already taken; the
    /// check and the insert are one step.
    async fn create_collection(&self, info: CollectionInfo) -> anyhow::Result<bool>;

    async fn set_state(&self, name: &str, state: CollectionState) -> anyhow::Result<()>;

    /// Unregister a collection. `false` if it was not registered.
    async fn remove_collection(&self, name: &str) -> anyhow::Result<bool>;
}

/// Cluster table loaded from configuration and kept in memory.
#[derive(Default)]
pub struct StaticClusterState {
    nodes: Vec<String>,
    collections: DashMap<String, CollectionInfo>,
}

impl StaticClusterState {
    pub fn new(nodes: Vec<String>, collections: Vec<CollectionInfo>) -> Self {
        Self {
            nodes,
            collections: collections
                .into_iter()
                .map(|c| (c.name.clone(), c))
                .collect(),
        }
    }
}

#[async_trait]
impl ClusterState for StaticClusterState {
    async fn collection(&self, name: &str) -> anyhow::Result<Option<CollectionInfo>> {
        Ok(self.collections.get(name).map(|c| c.value().clone()))
    }

    async fn live_nodes(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.nodes.clone())
    }

    async fn create_collection(&self, info: CollectionInfo) -> anyhow::Result<bool> {
        match self.collections.entry(info.name.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                tracing::info!(collection = %info.name, state = ?info.state, "Registered collection");
                slot.insert(info);
                Ok(true)
            }
        }
    }

    async fn set_state(&self, name: &str, state: CollectionState) -> anyhow::Result<()> {
        let mut entry = self
            .collections
            .get_mut(name)
            .ok_or_else(|| anyhow::anyhow!("Collection '{name}' not found"))?;
        tracing::info!(collection = name, from = ?entry.state, to = ?state, "Collection state change");
        entry.state = state;
        Ok(())
    }

    async fn remove_collection(&self, name: &str) -> anyhow::Result<bool> {
        let removed = self.collections.remove(name).is_some();
        if removed {
            tracing::info!(collection = name, "Unregistered collection");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn info(name: &str, state: CollectionState) -> CollectionInfo {
        CollectionInfo {
            name: name.into(),
            state,
            shards: vec![],
            properties: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_create_and_transition() {
        let cluster = StaticClusterState::new(vec!["node1".into()], vec![]);
        assert!(cluster
            .create_collection(info("restored", CollectionState::Restoring))
            .await
            .unwrap());

        let got = cluster.collection("restored").await.unwrap().unwrap();
        assert!(!got.is_servable());

        cluster
            .set_state("restored", CollectionState::Active)
            .await
            .unwrap();
        assert!(cluster
            .collection("restored")
            .await
            .unwrap()
            .unwrap()
            .is_servable());
    }

    #[tokio::test]
    async fn test_create_rejects_existing_name() {
        let cluster =
            StaticClusterState::new(vec![], vec![info("books", CollectionState::Active)]);
        assert!(!cluster
            .create_collection(info("books", CollectionState::Restoring))
            .await
            .unwrap());
        assert_eq!(
            cluster.collection("books").await.unwrap().unwrap().state,
            CollectionState::Active
        );
        assert!(cluster.set_state("missing", CollectionState::Failed).await.is_err());
    }

    #[tokio::test]
    async fn test_remove_frees_the_name() {
        let cluster =
            StaticClusterState::new(vec![], vec![info("books", CollectionState::Failed)]);
        assert!(cluster.remove_collection("books").await.unwrap());
        assert!(cluster.collection("books").await.unwrap().is_none());
        assert!(!cluster.remove_collection("books").await.unwrap());
        assert!(cluster
            .create_collection(info("books", CollectionState::Restoring))
            .await
            .unwrap());
    }
}
