//! In-process cluster for orchestrator tests: every node is a
//! [`ShardExecutor`] over its own temp data dir, reached through
//! [`LocalDispatcher`], and all of them share one registry.

use async_trait::async_trait;
use shard_agent::repository::{
    InputStream, LocalFileSystemRepository, OutputStream, RepositoryConfig, RepositoryFactories,
};
use shard_agent::{
    BackupManifest, BackupRepository, RepositoryError, RepositoryRegistry, ShardExecutor, ShardId,
};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use url::Url;

use crate::config::AppConfig;
use crate::error::CollectionError;
use crate::models::collection::{CollectionInfo, CollectionState, ReplicaRef, ShardPlacement};
use crate::models::operation::{BackupRequest, OperationKind, RestoreRequest};
use crate::services::backup_orchestrator::run_backup;
use crate::services::cluster_state::StaticClusterState;
use crate::services::dispatch::LocalDispatcher;
use crate::services::restore_orchestrator::run_restore;
use crate::state::AppState;

pub const COLLECTION: &str = "books";
pub const POISONED_KIND: &str = "poisoned";

/// Repository that can look around a location but fails every transfer.
#[derive(Debug)]
pub struct PoisonedRepository {
    inner: LocalFileSystemRepository,
}

impl PoisonedRepository {
    fn fail(&self, operation: &str) -> RepositoryError {
        RepositoryError::io(
            self.inner.name(),
            POISONED_KIND,
            operation,
            io::Error::new(io::ErrorKind::Other, "injected failure"),
        )
    }
}

#[async_trait]
impl BackupRepository for PoisonedRepository {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn kind(&self) -> &str {
        POISONED_KIND
    }

    fn default_location(&self) -> Option<&Url> {
        self.inner.default_location()
    }

    async fn exists(&self, uri: &Url) -> shard_agent::repository::Result<bool> {
        self.inner.exists(uri).await
    }

    async fn create_directory(&self, uri: &Url) -> shard_agent::repository::Result<()> {
        self.inner.create_directory(uri).await
    }

    async fn list(&self, dir: &Url) -> shard_agent::repository::Result<Vec<String>> {
        self.inner.list(dir).await
    }

    async fn copy_file_from(
        &self,
        _source_dir: &Path,
        file_name: &str,
        _dest: &Url,
    ) -> shard_agent::repository::Result<()> {
        Err(self.fail(&format!("copy '{file_name}'")))
    }

    async fn copy_file_to(
        &self,
        _source: &Url,
        file_name: &str,
        _dest_dir: &Path,
    ) -> shard_agent::repository::Result<()> {
        Err(self.fail(&format!("copy '{file_name}'")))
    }

    async fn open_input(
        &self,
        _dir: &Url,
        file_name: &str,
    ) -> shard_agent::repository::Result<InputStream> {
        Err(self.fail(&format!("open '{file_name}'")))
    }

    async fn create_output(&self, uri: &Url) -> shard_agent::repository::Result<OutputStream> {
        Err(self.fail(&format!("create {uri}")))
    }
}

pub fn factories() -> RepositoryFactories {
    RepositoryFactories::default().register(POISONED_KIND, |config| {
        let inner = LocalFileSystemRepository::from_options(&config.name, &config.options)?;
        Ok(Arc::new(PoisonedRepository { inner }) as Arc<dyn BackupRepository>)
    })
}

pub struct TestCluster {
    pub state: Arc<AppState>,
    pub executors: BTreeMap<String, Arc<ShardExecutor>>,
    /// Shared backup location, visible to every node
    pub backups: TempDir,
    _data_dirs: Vec<TempDir>,
}

impl TestCluster {
    /// Two nodes, a `local` default repository and a `poisoned` one, both
    /// pointed at the shared backup dir.
    pub fn new() -> Self {
        Self::with_repositories(|backups| {
            let location = backups.display().to_string();
            vec![
                RepositoryConfig::new("local", "local")
                    .as_default()
                    .with_option("location", location.clone()),
                RepositoryConfig::new("poisoned", POISONED_KIND).with_option("location", location),
            ]
        })
    }

    pub fn with_repositories(repositories: impl FnOnce(&Path) -> Vec<RepositoryConfig>) -> Self {
        let backups = TempDir::new().unwrap();
        let registry = Arc::new(
            RepositoryRegistry::from_configs(&repositories(backups.path()), &factories()).unwrap(),
        );

        let mut executors = BTreeMap::new();
        let mut dispatcher = LocalDispatcher::new();
        let mut data_dirs = Vec::new();
        for node in ["node1", "node2"] {
            let dir = TempDir::new().unwrap();
            let executor = Arc::new(ShardExecutor::new(Arc::clone(&registry), dir.path()));
            dispatcher = dispatcher.with_node(node, Arc::clone(&executor));
            executors.insert(node.to_string(), executor);
            data_dirs.push(dir);
        }

        let placements = [("shard1", "node1"), ("shard2", "node2"), ("shard3", "node1")];
        let collection = CollectionInfo {
            name: COLLECTION.into(),
            state: CollectionState::Active,
            shards: placements
                .iter()
                .enumerate()
                .map(|(i, (shard, node))| ShardPlacement {
                    shard_id: ShardId::from(*shard),
                    leader: ReplicaRef {
                        replica_id: format!("core_node{}", i + 1),
                        node: node.to_string(),
                    },
                })
                .collect(),
            properties: BTreeMap::from([("configName".to_string(), "books_conf".to_string())]),
        };

        for placement in &collection.shards {
            let index = executors[&placement.leader.node].index_dir(COLLECTION, &placement.shard_id);
            std::fs::create_dir_all(&index).unwrap();
            let shard = placement.shard_id.as_str();
            std::fs::write(index.join("_0.cfs"), format!("{shard} compound segment")).unwrap();
            std::fs::write(index.join("_0.si"), format!("{shard} segment info")).unwrap();
            std::fs::write(index.join("segments_1"), vec![shard.len() as u8; 4096]).unwrap();
        }

        let cluster = StaticClusterState::new(
            executors.keys().cloned().collect(),
            vec![collection],
        );
        let config = AppConfig {
            task_timeout: Duration::from_secs(30),
            ..AppConfig::default()
        };
        let state = Arc::new(AppState::new(
            config,
            registry,
            Arc::new(cluster),
            Arc::new(dispatcher),
        ));

        Self {
            state,
            executors,
            backups,
            _data_dirs: data_dirs,
        }
    }

    pub fn backup_path(&self, backup_name: &str) -> PathBuf {
        self.backups.path().join(backup_name)
    }

    pub async fn backup(
        &self,
        backup_name: &str,
        repository: Option<&str>,
        location: Option<&str>,
    ) -> Result<BackupManifest, CollectionError> {
        let op = self.state.operations.start(
            OperationKind::Backup,
            COLLECTION,
            backup_name,
            repository,
        );
        let request = BackupRequest {
            collection: COLLECTION.into(),
            backup_name: backup_name.into(),
            location: location.map(String::from),
            repository: repository.map(String::from),
        };
        run_backup(Arc::clone(&self.state), request, op).await
    }

    pub async fn restore(
        &self,
        target: &str,
        backup_name: &str,
        repository: Option<&str>,
        location: Option<&str>,
    ) -> Result<CollectionInfo, CollectionError> {
        let op = self.state.operations.start(
            OperationKind::Restore,
            target,
            backup_name,
            repository,
        );
        let request = RestoreRequest {
            collection: target.into(),
            backup_name: backup_name.into(),
            location: location.map(String::from),
            repository: repository.map(String::from),
        };
        run_restore(Arc::clone(&self.state), request, op).await
    }

    /// File name to contents for one shard's index on one node.
    pub fn read_index(&self, node: &str, collection: &str, shard: &ShardId) -> HashMap<String, Vec<u8>> {
        let dir = self.executors[node].index_dir(collection, shard);
        std::fs::read_dir(&dir)
            .unwrap()
            .map(|entry| {
                let entry = entry.unwrap();
                (
                    entry.file_name().to_string_lossy().to_string(),
                    std::fs::read(entry.path()).unwrap(),
                )
            })
            .collect()
    }

    pub async fn collection(&self, name: &str) -> Option<CollectionInfo> {
        self.state.cluster.collection(name).await.unwrap()
    }
}
