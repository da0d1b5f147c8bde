//! Collection backup: one shard task per shard leader, then the manifest.
//!
//! Every check that can fail without touching a shard runs before any task
//! is dispatched. The manifest is written only after every shard reported
//! success, so a backup either publishes a manifest or leaves none.

use dashmap::DashSet;
use shard_agent::manifest::{self, BackupManifest, ShardManifest};
use shard_agent::ShardBackupTask;
use std::sync::Arc;
use url::Url;

use crate::error::CollectionError;
use crate::models::operation::{BackupRequest, OperationState};
use crate::services::fanout::{aggregate, await_all, spawn_shard};
use crate::services::location::resolve_location;
use crate::services::operation_tracker::OperationHandle;
use crate::state::AppState;

pub async fn run_backup(
    state: Arc<AppState>,
    request: BackupRequest,
    op: OperationHandle,
) -> Result<BackupManifest, CollectionError> {
    let result = run_backup_inner(&state, &request, &op).await;

    match &result {
        Ok(manifest) => state.operations.finish(
            &op.id,
            OperationState::Committed,
            Some(format!(
                "{} files, {} bytes",
                manifest.total_files(),
                manifest.total_bytes()
            )),
        ),
        Err(e) => {
            tracing::warn!(
                collection = %request.collection,
                backup = %request.backup_name,
                "Backup aborted: {e}"
            );
            state
                .operations
                .finish(&op.id, OperationState::Aborted, Some(e.to_string()));
        }
    }
    result
}

async fn run_backup_inner(
    state: &Arc<AppState>,
    request: &BackupRequest,
    op: &OperationHandle,
) -> Result<BackupManifest, CollectionError> {
    // INIT
    let repo = state.registry.resolve(request.repository.as_deref())?;
    state.operations.set_repository(&op.id, repo.name());
    let location = resolve_location(repo.as_ref(), request.location.as_deref())?;

    let collection = state
        .cluster
        .collection(&request.collection)
        .await
        .map_err(CollectionError::Cluster)?
        .ok_or_else(|| CollectionError::CollectionNotFound(request.collection.clone()))?;
    if !collection.is_servable() {
        return Err(CollectionError::Cluster(anyhow::anyhow!(
            "Collection '{}' is {:?}",
            collection.name,
            collection.state
        )));
    }
    if collection.shards.is_empty() {
        return Err(CollectionError::Cluster(anyhow::anyhow!(
            "Collection '{}' has no shards",
            collection.name
        )));
    }

    let dir = manifest::backup_dir(repo.as_ref(), &location, &request.backup_name)?;
    let _in_flight = InFlightBackup::acquire(&state.running_backups, &dir, request)?;

    if manifest::manifest_exists(repo.as_ref(), &location, &request.backup_name).await? {
        return Err(CollectionError::BackupExists {
            backup_name: request.backup_name.clone(),
            location: location.to_string(),
        });
    }
    repo.create_directory(&dir).await?;

    if op.cancel.is_cancelled() {
        return Err(CollectionError::Cancelled);
    }

    let _permit = state
        .operation_semaphore
        .acquire()
        .await
        .map_err(|e| CollectionError::Cluster(e.into()))?;

    // DISPATCHED
    state.operations.transition(&op.id, OperationState::Dispatched);
    tracing::info!(
        collection = %collection.name,
        backup = %request.backup_name,
        repository = repo.name(),
        location = %location,
        shards = collection.shards.len(),
        "Dispatching shard backups"
    );

    let pending: Vec<_> = collection
        .shards
        .iter()
        .map(|placement| {
            let task = ShardBackupTask {
                task_id: format!("{}-{}", op.id, placement.shard_id),
                collection: collection.name.clone(),
                shard_id: placement.shard_id.clone(),
                replica_id: placement.leader.replica_id.clone(),
                repository: repo.name().to_string(),
                location: location.clone(),
                backup_name: request.backup_name.clone(),
            };
            let dispatcher = Arc::clone(&state.dispatcher);
            let node = placement.leader.node.clone();
            spawn_shard(
                placement.shard_id.clone(),
                node.clone(),
                task.task_id.clone(),
                state.config.task_timeout,
                async move { dispatcher.backup(&node, task).await },
            )
        })
        .collect();
    state.operations.set_shards(&op.id, pending.len(), 0);

    // AWAITING_RESULTS
    state
        .operations
        .transition(&op.id, OperationState::AwaitingResults);
    let (results, cancelled) = await_all(pending, &state.dispatcher, &op.cancel).await;

    let reports = aggregate(results).map_err(|f| {
        state.operations.set_shards(&op.id, f.total, f.failed);
        CollectionError::PartialFailure {
            operation: "Backup",
            collection: collection.name.clone(),
            repository: repo.name().to_string(),
            failed: f.failed,
            total: f.total,
            shard_id: f.shard_id,
            reason: f.reason,
            cause: f.cause,
        }
    })?;
    if cancelled {
        return Err(CollectionError::Cancelled);
    }

    // COMMITTED
    let shards = reports
        .into_iter()
        .map(|(shard_id, report)| {
            let leader_replica_id = collection
                .shards
                .iter()
                .find(|p| p.shard_id == shard_id)
                .map(|p| p.leader.replica_id.clone())
                .unwrap_or_default();
            ShardManifest {
                shard_id,
                leader_replica_id,
                files: report.files,
            }
        })
        .collect();

    let published = BackupManifest::new(
        collection.name.clone(),
        request.backup_name.clone(),
        location,
        repo.name(),
        collection.properties.clone(),
        shards,
    );
    manifest::write_manifest(repo.as_ref(), &published).await?;
    Ok(published)
}

/// Marks a backup directory as being written; released on drop.
struct InFlightBackup {
    set: Arc<DashSet<String>>,
    key: String,
}

impl InFlightBackup {
    fn acquire(
        set: &Arc<DashSet<String>>,
        dir: &Url,
        request: &BackupRequest,
    ) -> Result<Self, CollectionError> {
        let key = dir.to_string();
        if !set.insert(key.clone()) {
            return Err(CollectionError::BackupInProgress {
                backup_name: request.backup_name.clone(),
                location: key,
            });
        }
        Ok(Self {
            set: Arc::clone(set),
            key,
        })
    }
}

impl Drop for InFlightBackup {
    fn drop(&mut self) {
        self.set.remove(&self.key);
    }
}
