//! Collection restore: recreate a collection from a published backup.
//!
//! The new collection is registered as `Restoring` before any shard task
//! starts and only becomes `Active` once every shard has been restored.
//! An aborted restore discards whatever the nodes installed and unregisters
//! the collection, so the same restore can simply be submitted again. If a
//! node cannot be reached for the cleanup the collection stays `Failed`.

use shard_agent::manifest;
use shard_agent::{ShardId, ShardRestoreTask};
use std::sync::Arc;

use crate::error::CollectionError;
use crate::models::collection::{place_round_robin, CollectionInfo, CollectionState};
use crate::models::operation::{OperationState, RestoreRequest};
use crate::services::fanout::{aggregate, await_all, spawn_shard};
use crate::services::location::resolve_location;
use crate::services::operation_tracker::OperationHandle;
use crate::state::AppState;

pub async fn run_restore(
    state: Arc<AppState>,
    request: RestoreRequest,
    op: OperationHandle,
) -> Result<CollectionInfo, CollectionError> {
    let result = run_restore_inner(&state, &request, &op).await;

    match &result {
        Ok(info) => state.operations.finish(
            &op.id,
            OperationState::Ready,
            Some(format!("{} shard(s) restored", info.shards.len())),
        ),
        Err(e) => {
            tracing::warn!(
                collection = %request.collection,
                backup = %request.backup_name,
                "Restore aborted: {e}"
            );
            state
                .operations
                .finish(&op.id, OperationState::Aborted, Some(e.to_string()));
        }
    }
    result
}

async fn run_restore_inner(
    state: &Arc<AppState>,
    request: &RestoreRequest,
    op: &OperationHandle,
) -> Result<CollectionInfo, CollectionError> {
    // INIT
    let repo = state.registry.resolve(request.repository.as_deref())?;
    state.operations.set_repository(&op.id, repo.name());
    let location = resolve_location(repo.as_ref(), request.location.as_deref())?;

    let backup = manifest::read_manifest(repo.as_ref(), &location, &request.backup_name)
        .await?
        .ok_or_else(|| CollectionError::ManifestNotFound {
            backup_name: request.backup_name.clone(),
            location: location.to_string(),
        })?;

    if state
        .cluster
        .collection(&request.collection)
        .await
        .map_err(CollectionError::Cluster)?
        .is_some()
    {
        return Err(CollectionError::CollectionExists(request.collection.clone()));
    }

    let nodes = state
        .cluster
        .live_nodes()
        .await
        .map_err(CollectionError::Cluster)?;
    let shard_ids: Vec<ShardId> = backup.shards.iter().map(|s| s.shard_id.clone()).collect();
    let placements = place_round_robin(&shard_ids, &nodes).ok_or_else(|| {
        CollectionError::Cluster(anyhow::anyhow!("No live nodes to restore onto"))
    })?;

    if op.cancel.is_cancelled() {
        return Err(CollectionError::Cancelled);
    }

    let _permit = state
        .operation_semaphore
        .acquire()
        .await
        .map_err(|e| CollectionError::Cluster(e.into()))?;

    let mut properties = backup.properties.clone();
    properties.insert("restored_from".into(), backup.backup_name.clone());
    let mut info = CollectionInfo {
        name: request.collection.clone(),
        state: CollectionState::Restoring,
        shards: placements,
        properties,
    };
    let created = state
        .cluster
        .create_collection(info.clone())
        .await
        .map_err(CollectionError::Cluster)?;
    if !created {
        // Another restore registered the name since the check above
        return Err(CollectionError::CollectionExists(request.collection.clone()));
    }

    // DISPATCHED
    state.operations.transition(&op.id, OperationState::Dispatched);
    tracing::info!(
        collection = %info.name,
        backup = %backup.backup_name,
        source_collection = %backup.collection_name,
        repository = repo.name(),
        shards = info.shards.len(),
        "Dispatching shard restores"
    );

    let pending: Vec<_> = info
        .shards
        .iter()
        .map(|placement| {
            let files = backup
                .shard(&placement.shard_id)
                .map(|s| s.files.clone())
                .unwrap_or_default();
            let task = ShardRestoreTask {
                task_id: format!("{}-{}", op.id, placement.shard_id),
                collection: info.name.clone(),
                shard_id: placement.shard_id.clone(),
                repository: repo.name().to_string(),
                location: location.clone(),
                backup_name: backup.backup_name.clone(),
                files,
            };
            let dispatcher = Arc::clone(&state.dispatcher);
            let node = placement.leader.node.clone();
            spawn_shard(
                placement.shard_id.clone(),
                node.clone(),
                task.task_id.clone(),
                state.config.task_timeout,
                async move { dispatcher.restore(&node, task).await },
            )
        })
        .collect();
    state.operations.set_shards(&op.id, pending.len(), 0);

    // AWAITING_RESULTS
    state
        .operations
        .transition(&op.id, OperationState::AwaitingResults);
    let (results, cancelled) = await_all(pending, &state.dispatcher, &op.cancel).await;

    let outcome = match aggregate(results) {
        Err(f) => {
            state.operations.set_shards(&op.id, f.total, f.failed);
            Err(CollectionError::PartialFailure {
                operation: "Restore",
                collection: info.name.clone(),
                repository: repo.name().to_string(),
                failed: f.failed,
                total: f.total,
                shard_id: f.shard_id,
                reason: f.reason,
                cause: f.cause,
            })
        }
        Ok(_) if cancelled => Err(CollectionError::Cancelled),
        Ok(_) => Ok(()),
    };

    if let Err(e) = outcome {
        abandon(state, &info).await;
        return Err(e);
    }

    // READY
    state
        .cluster
        .set_state(&info.name, CollectionState::Active)
        .await
        .map_err(CollectionError::Cluster)?;
    info.state = CollectionState::Active;
    Ok(info)
}

/// Undo a restore that did not complete. The collection is marked `Failed`
/// first so it is never servable, then every node drops its copy of the
/// shards and the name is released.
async fn abandon(state: &AppState, info: &CollectionInfo) {
    if let Err(e) = state
        .cluster
        .set_state(&info.name, CollectionState::Failed)
        .await
    {
        tracing::error!(collection = %info.name, "Failed to mark collection failed: {e:#}");
    }

    let discards = info.shards.iter().map(|placement| {
        state
            .dispatcher
            .discard(&placement.leader.node, &info.name, &placement.shard_id)
    });
    let discarded = futures_util::future::join_all(discards).await;
    if discarded.iter().any(|ok| !ok) {
        tracing::error!(
            collection = %info.name,
            failed = discarded.iter().filter(|ok| !**ok).count(),
            "Could not discard every restored shard, collection left failed"
        );
        return;
    }

    match state.cluster.remove_collection(&info.name).await {
        Ok(_) => tracing::info!(collection = %info.name, "Rolled back aborted restore"),
        Err(e) => tracing::error!(collection = %info.name, "Failed to unregister collection: {e:#}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{TestCluster, COLLECTION};

    #[tokio::test]
    async fn test_round_trip_is_byte_identical() {
        let cluster = TestCluster::new();
        cluster.backup("nightly", None, None).await.unwrap();

        let restored = cluster.restore("books_copy", "nightly", None, None).await.unwrap();
        assert_eq!(restored.state, CollectionState::Active);
        assert_eq!(restored.properties["restored_from"], "nightly");
        assert_eq!(restored.properties["configName"], "books_conf");
        assert!(cluster.collection("books_copy").await.unwrap().is_servable());

        let source_collection = cluster.collection(COLLECTION).await.unwrap();
        for placement in &source_collection.shards {
            let source = cluster.read_index(&placement.leader.node, COLLECTION, &placement.shard_id);
            let target_node = &restored
                .shards
                .iter()
                .find(|p| p.shard_id == placement.shard_id)
                .unwrap()
                .leader
                .node;
            let copy = cluster.read_index(target_node, "books_copy", &placement.shard_id);
            assert_eq!(source, copy, "shard {}", placement.shard_id);
        }
    }

    #[tokio::test]
    async fn test_missing_backup() {
        let cluster = TestCluster::new();
        let err = cluster
            .restore("books_copy", "never-taken", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CollectionError::ManifestNotFound { .. }));
        assert!(cluster.collection("books_copy").await.is_none());
    }

    #[tokio::test]
    async fn test_existing_target_rejected() {
        let cluster = TestCluster::new();
        cluster.backup("nightly", None, None).await.unwrap();

        let err = cluster
            .restore(COLLECTION, "nightly", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CollectionError::CollectionExists(_)));
    }

    #[tokio::test]
    async fn test_failing_repository_never_servable() {
        let cluster = TestCluster::new();
        cluster.backup("nightly", None, None).await.unwrap();

        let err = cluster
            .restore("books_copy", "nightly", Some("poisoned"), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("poisoned"), "{err}");
        assert!(cluster
            .collection("books_copy")
            .await
            .map_or(true, |c| !c.is_servable()));
    }

    #[tokio::test]
    async fn test_corrupt_backup_rolls_back_restore() {
        let cluster = TestCluster::new();
        cluster.backup("nightly", None, None).await.unwrap();
        std::fs::write(
            cluster.backup_path("nightly").join("shard2").join("_0.cfs"),
            b"tampered",
        )
        .unwrap();

        let err = cluster
            .restore("books_copy", "nightly", None, None)
            .await
            .unwrap_err();
        match &err {
            CollectionError::PartialFailure {
                failed, shard_id, ..
            } => {
                assert_eq!(*failed, 1);
                assert_eq!(shard_id, &ShardId::from("shard2"));
            }
            other => panic!("expected partial failure, got {other:?}"),
        }

        assert!(cluster.collection("books_copy").await.is_none());
        for executor in cluster.executors.values() {
            assert!(!executor.data_dir().join("books_copy").join("shard1").exists());
            assert!(!executor.data_dir().join("books_copy").join("shard2").exists());
            assert!(!executor.data_dir().join("books_copy").join("shard3").exists());
        }
    }

    #[tokio::test]
    async fn test_restore_can_be_retried_after_abort() {
        let cluster = TestCluster::new();
        cluster.backup("nightly", None, None).await.unwrap();
        let damaged = cluster.backup_path("nightly").join("shard2").join("_0.cfs");
        let intact = std::fs::read(&damaged).unwrap();
        std::fs::write(&damaged, b"tampered").unwrap();

        cluster
            .restore("books_copy", "nightly", None, None)
            .await
            .unwrap_err();

        std::fs::write(&damaged, &intact).unwrap();
        let restored = cluster
            .restore("books_copy", "nightly", None, None)
            .await
            .unwrap();
        assert_eq!(restored.state, CollectionState::Active);
        assert!(cluster.collection("books_copy").await.unwrap().is_servable());
    }

    #[tokio::test]
    async fn test_location_with_whitespace_round_trips() {
        let cluster = TestCluster::new();
        let spaced = cluster.backups.path().join("my backups");
        std::fs::create_dir_all(&spaced).unwrap();
        let location = spaced.display().to_string();
        cluster.backup("nightly", None, Some(&location)).await.unwrap();

        let restored = cluster
            .restore("books_copy", "nightly", None, Some(&location))
            .await
            .unwrap();
        assert_eq!(restored.state, CollectionState::Active);

        let source_collection = cluster.collection(COLLECTION).await.unwrap();
        for placement in &source_collection.shards {
            let target = restored
                .shards
                .iter()
                .find(|p| p.shard_id == placement.shard_id)
                .unwrap();
            assert_eq!(
                cluster.read_index(&placement.leader.node, COLLECTION, &placement.shard_id),
                cluster.read_index(&target.leader.node, "books_copy", &placement.shard_id),
                "shard {}",
                placement.shard_id
            );
        }
    }

    #[tokio::test]
    async fn test_restore_through_failing_default_repository() {
        use crate::error::ErrorCode;
        use shard_agent::repository::RepositoryConfig;

        let cluster = TestCluster::with_repositories(|backups| {
            let location = backups.display().to_string();
            vec![
                RepositoryConfig::new("broken", crate::test_support::POISONED_KIND)
                    .as_default()
                    .with_option("location", location.clone()),
                RepositoryConfig::new("local", "local").with_option("location", location),
            ]
        });
        cluster.backup("nightly", Some("local"), None).await.unwrap();

        let err = cluster
            .restore("books_copy", "nightly", None, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ServerError);
        assert!(err.to_string().contains("broken"), "{err}");
        assert!(cluster.collection("books_copy").await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_restores_to_one_name() {
        let cluster = TestCluster::new();
        cluster.backup("nightly", None, None).await.unwrap();

        let (a, b) = tokio::join!(
            cluster.restore("books_copy", "nightly", None, None),
            cluster.restore("books_copy", "nightly", None, None),
        );
        let (won, lost) = match (a, b) {
            (Ok(info), Err(e)) | (Err(e), Ok(info)) => (info, e),
            other => panic!("expected exactly one restore to win, got {other:?}"),
        };
        assert_eq!(won.state, CollectionState::Active);
        assert!(matches!(lost, CollectionError::CollectionExists(_)), "{lost:?}");
        assert!(cluster.collection("books_copy").await.unwrap().is_servable());
    }
}
