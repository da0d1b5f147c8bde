//! Shard task endpoints.
//!
//! Each call runs to completion and answers with the task's
//! `OperationResult`; a failed copy is a successful HTTP exchange.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::task::{OperationResult, ShardBackupTask, ShardId, ShardRestoreTask};

#[derive(Debug, Deserialize)]
pub struct CancelTaskRequest {
    pub task_id: String,
}

#[derive(Debug, Serialize)]
pub struct CancelTaskResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DiscardShardRequest {
    pub collection: String,
    pub shard_id: ShardId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DiscardShardResponse {
    pub discarded: bool,
}

/// POST /shards/backup
pub async fn backup_shard(
    State(state): State<super::AppState>,
    Json(task): Json<ShardBackupTask>,
) -> Json<OperationResult> {
    Json(state.executor.backup_shard(task).await)
}

/// POST /shards/restore
pub async fn restore_shard(
    State(state): State<super::AppState>,
    Json(task): Json<ShardRestoreTask>,
) -> Json<OperationResult> {
    Json(state.executor.restore_shard(task).await)
}

/// POST /shards/cancel
pub async fn cancel_task(
    State(state): State<super::AppState>,
    Json(req): Json<CancelTaskRequest>,
) -> Result<Json<CancelTaskResponse>, StatusCode> {
    if state.executor.cancel(&req.task_id) {
        Ok(Json(CancelTaskResponse {
            status: "cancelling".to_string(),
        }))
    } else {
        tracing::warn!("Task not found or already completed: {}", req.task_id);
        Err(StatusCode::NOT_FOUND)
    }
}

/// POST /shards/discard - drop a shard's local index after an aborted restore
pub async fn discard_shard(
    State(state): State<super::AppState>,
    Json(req): Json<DiscardShardRequest>,
) -> Result<Json<DiscardShardResponse>, (StatusCode, String)> {
    match state
        .executor
        .discard_shard(&req.collection, &req.shard_id)
        .await
    {
        Ok(discarded) => Ok(Json(DiscardShardResponse { discarded })),
        Err(e) => {
            tracing::warn!(
                collection = %req.collection,
                shard = %req.shard_id,
                "Failed to discard shard: {}", e
            );
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}
