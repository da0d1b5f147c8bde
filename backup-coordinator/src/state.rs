use crate::config::AppConfig;
use crate::services::cluster_state::ClusterState;
use crate::services::dispatch::ShardDispatcher;
use crate::services::operation_tracker::OperationTracker;
use dashmap::DashSet;
use shard_agent::RepositoryRegistry;
use std::sync::Arc;
use tokio::sync::Semaphore;

pub struct AppState {
    pub config: AppConfig,
    pub registry: Arc<RepositoryRegistry>,
    pub cluster: Arc<dyn ClusterState>,
    pub dispatcher: Arc<dyn ShardDispatcher>,
    pub operations: OperationTracker,
    /// Backup directories currently being written
    pub running_backups: Arc<DashSet<String>>,
    pub operation_semaphore: Arc<Semaphore>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        registry: Arc<RepositoryRegistry>,
        cluster: Arc<dyn ClusterState>,
        dispatcher: Arc<dyn ShardDispatcher>,
    ) -> Self {
        let max_operations = config.max_concurrent_operations.max(1);
        Self {
            config,
            registry,
            cluster,
            dispatcher,
            operations: OperationTracker::new(),
            running_backups: Arc::new(DashSet::new()),
            operation_semaphore: Arc::new(Semaphore::new(max_operations)),
        }
    }
}
