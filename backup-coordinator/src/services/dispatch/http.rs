use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use shard_agent::{OperationResult, ShardBackupTask, ShardId, ShardRestoreTask};
use std::collections::HashMap;

use super::ShardDispatcher;
use crate::config::NodeConfig;

/// Sends tasks to shard agents over HTTP.
pub struct HttpDispatcher {
    client: reqwest::Client,
    nodes: HashMap<String, String>,
}

impl HttpDispatcher {
    pub fn new(nodes: &[NodeConfig]) -> Self {
        Self::with_client(nodes, reqwest::Client::new())
    }

    pub fn with_client(nodes: &[NodeConfig], client: reqwest::Client) -> Self {
        Self {
            client,
            nodes: nodes
                .iter()
                .map(|n| (n.id.clone(), n.url.trim_end_matches('/').to_string()))
                .collect(),
        }
    }

    fn endpoint(&self, node: &str, path: &str) -> Option<String> {
        self.nodes.get(node).map(|base| format!("{base}{path}"))
    }

    async fn post<B, R>(&self, node: &str, path: &str, body: &B) -> Result<R, String>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = self
            .endpoint(node, path)
            .ok_or_else(|| format!("Unknown node '{node}'"))?;

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| format!("Node '{node}' unreachable: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(format!("Node '{node}' answered {status}: {text}"));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| format!("Bad response from node '{node}': {e}"))
    }

    async fn run<B: Serialize + Sync>(
        &self,
        node: &str,
        path: &str,
        shard_id: ShardId,
        body: &B,
    ) -> OperationResult {
        match self.post::<B, OperationResult>(node, path, body).await {
            Ok(result) => result,
            Err(reason) => {
                tracing::warn!(node, shard = %shard_id, "{reason}");
                OperationResult::failure(shard_id, reason, None)
            }
        }
    }
}

#[async_trait]
impl ShardDispatcher for HttpDispatcher {
    async fn backup(&self, node: &str, task: ShardBackupTask) -> OperationResult {
        let shard_id = task.shard_id.clone();
        self.run(node, "/shards/backup", shard_id, &task).await
    }

    async fn restore(&self, node: &str, task: ShardRestoreTask) -> OperationResult {
        let shard_id = task.shard_id.clone();
        self.run(node, "/shards/restore", shard_id, &task).await
    }

    async fn cancel(&self, node: &str, task_id: &str) -> bool {
        let body = serde_json::json!({ "task_id": task_id });
        self.post::<_, serde_json::Value>(node, "/shards/cancel", &body)
            .await
            .is_ok()
    }

    async fn discard(&self, node: &str, collection: &str, shard_id: &ShardId) -> bool {
        let body = serde_json::json!({ "collection": collection, "shard_id": shard_id });
        match self
            .post::<_, serde_json::Value>(node, "/shards/discard", &body)
            .await
        {
            Ok(_) => true,
            Err(reason) => {
                tracing::warn!(node, shard = %shard_id, "{reason}");
                false
            }
        }
    }
}
