//! Delivery of shard tasks to the nodes that hold the shards.
//!
//! A dispatcher never fails: transport problems come back as a failed
//! [`OperationResult`] for the shard, like any other shard failure.

mod http;
mod local;

pub use http::HttpDispatcher;
pub use local::LocalDispatcher;

use async_trait::async_trait;
use shard_agent::{OperationResult, ShardBackupTask, ShardId, ShardRestoreTask};

#[async_trait]
pub trait ShardDispatcher: Send + Sync {
    async fn backup(&self, node: &str, task: ShardBackupTask) -> OperationResult;

    async fn restore(&self, node: &str, task: ShardRestoreTask) -> OperationResult;

    /// Ask a node to stop a running task. `false` if the node did not know it.
    async fn cancel(&self, node: &str, task_id: &str) -> bool;

    /// Ask a node to delete its local copy of a shard, installed or staged.
    /// `false` if the request failed.
    async fn discard(&self, node: &str, collection: &str, shard_id: &ShardId) -> bool;
}
