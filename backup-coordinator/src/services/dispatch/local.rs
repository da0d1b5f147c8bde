use async_trait::async_trait;
use shard_agent::{OperationResult, ShardBackupTask, ShardExecutor, ShardId, ShardRestoreTask};
use std::collections::HashMap;
use std::sync::Arc;

use super::ShardDispatcher;

/// Runs tasks on executors living in this process.
#[derive(Default)]
pub struct LocalDispatcher {
    executors: HashMap<String, Arc<ShardExecutor>>,
}

impl LocalDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(mut self, node: impl Into<String>, executor: Arc<ShardExecutor>) -> Self {
        self.executors.insert(node.into(), executor);
        self
    }
}

#[async_trait]
impl ShardDispatcher for LocalDispatcher {
    async fn backup(&self, node: &str, task: ShardBackupTask) -> OperationResult {
        match self.executors.get(node) {
            Some(executor) => executor.backup_shard(task).await,
            None => OperationResult::failure(task.shard_id, format!("Unknown node '{node}'"), None),
        }
    }

    async fn restore(&self, node: &str, task: ShardRestoreTask) -> OperationResult {
        match self.executors.get(node) {
            Some(executor) => executor.restore_shard(task).await,
            None => OperationResult::failure(task.shard_id, format!("Unknown node '{node}'"), None),
        }
    }

    async fn cancel(&self, node: &str, task_id: &str) -> bool {
        self.executors
            .get(node)
            .map(|executor| executor.cancel(task_id))
            .unwrap_or(false)
    }

    async fn discard(&self, node: &str, collection: &str, shard_id: &ShardId) -> bool {
        let Some(executor) = self.executors.get(node) else {
            return false;
        };
        match executor.discard_shard(collection, shard_id).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(node, shard = %shard_id, "Failed to discard shard: {e}");
                false
            }
        }
    }
}
