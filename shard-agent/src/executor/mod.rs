//! Shard task executor.
//!
//! Runs one shard's backup or restore on the node that holds the shard:
//! - lists the local index directory
//! - copies every file through the task's repository, several at a time
//! - records or verifies a checksum per file
//!
//! The result is always an [`OperationResult`]; errors never escape.

pub mod job_tracker;

use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::fs::checksum::sha256_file;
use crate::fs::walker::{calculate_total_size, walk_directory, WalkOptions};
use crate::manifest::{is_path_component, shard_dir, FileDescriptor};
use crate::repository::RepositoryRegistry;
use crate::task::{OperationResult, ShardBackupTask, ShardId, ShardReport, ShardRestoreTask};
use crate::utils::errors::{AgentError, Result};
pub use job_tracker::JobTracker;

/// Default copy budget: total permits in the per-task semaphore.
pub const DEFAULT_COPY_BUDGET: usize = 16;

/// Permits a copy takes, by file size. Many small files copy in parallel,
/// large segment files mostly one at a time.
///
/// | File size      | Permits |
/// |----------------|---------|
/// | < 10 MB        | 1       |
/// | 10 – 100 MB    | 4       |
/// | > 100 MB       | 16      |
fn copy_weight(file_size: u64, budget: usize) -> u32 {
    let weight = match file_size {
        0..=10_485_759 => 1,
        10_485_760..=104_857_599 => 4,
        _ => 16,
    };
    weight.min(budget.max(1) as u32)
}

/// One file to move.
#[derive(Debug, Clone)]
struct CopyItem {
    name: String,
    size: u64,
    /// Descriptor recorded at backup time, checked after restore
    expected: Option<FileDescriptor>,
}

type CopyOp = Arc<dyn Fn(CopyItem) -> BoxFuture<'static, Result<FileDescriptor>> + Send + Sync>;

pub struct ShardExecutor {
    registry: Arc<RepositoryRegistry>,
    data_dir: PathBuf,
    copy_budget: usize,
    jobs: JobTracker,
}

impl ShardExecutor {
    pub fn new(registry: Arc<RepositoryRegistry>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            data_dir: data_dir.into(),
            copy_budget: DEFAULT_COPY_BUDGET,
            jobs: JobTracker::new(),
        }
    }

    pub fn with_copy_budget(mut self, copy_budget: usize) -> Self {
        self.copy_budget = copy_budget.max(1);
        self
    }

    pub fn jobs(&self) -> &JobTracker {
        &self.jobs
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// `<data_dir>/<collection>/<shard>/index`
    pub fn index_dir(&self, collection: &str, shard_id: &ShardId) -> PathBuf {
        self.data_dir
            .join(collection)
            .join(shard_id.as_str())
            .join("index")
    }

    /// Request cancellation of a running task. In-flight copies finish.
    pub fn cancel(&self, task_id: &str) -> bool {
        let found = self.jobs.cancel(task_id);
        if found {
            info!(task_id, "Cancellation requested");
        }
        found
    }

    pub async fn backup_shard(&self, task: ShardBackupTask) -> OperationResult {
        let job = self.jobs.register(&task.task_id);
        let start = Instant::now();

        info!(
            task_id = %task.task_id,
            collection = %task.collection,
            shard = %task.shard_id,
            repository = %task.repository,
            backup = %task.backup_name,
            "Starting shard backup"
        );

        let result = self.run_backup(&task, job.token()).await;
        drop(job);

        finish(task.shard_id, "backup", start, result)
    }

    pub async fn restore_shard(&self, task: ShardRestoreTask) -> OperationResult {
        let job = self.jobs.register(&task.task_id);
        let start = Instant::now();

        info!(
            task_id = %task.task_id,
            collection = %task.collection,
            shard = %task.shard_id,
            repository = %task.repository,
            backup = %task.backup_name,
            files = task.files.len(),
            "Starting shard restore"
        );

        let result = self.run_restore(&task, job.token()).await;
        drop(job);

        finish(task.shard_id, "restore", start, result)
    }

    async fn run_backup(
        &self,
        task: &ShardBackupTask,
        cancel: &CancellationToken,
    ) -> Result<ShardReport> {
        let repo = self.registry.resolve(Some(task.repository.as_str()))?;
        let index_dir = self.index_dir(&task.collection, &task.shard_id);
        if !tokio::fs::try_exists(&index_dir).await? {
            return Err(AgentError::IndexNotFound(index_dir.display().to_string()));
        }

        // Directory walk is blocking I/O
        let walk_root = index_dir.clone();
        let files = tokio::task::spawn_blocking(move || {
            walk_directory(&walk_root, &WalkOptions::default())
        })
        .await
        .map_err(|e| AgentError::Task(format!("directory walk failed: {e}")))??;

        debug!(
            shard = %task.shard_id,
            files = files.len(),
            bytes = calculate_total_size(&files),
            "Scanned index directory"
        );

        let dest = shard_dir(repo.as_ref(), &task.location, &task.backup_name, &task.shard_id)?;
        repo.create_directory(&dest).await?;

        let items = files
            .into_iter()
            .map(|f| CopyItem {
                name: f.name,
                size: f.size,
                expected: None,
            })
            .collect();

        let op: CopyOp = Arc::new(move |item: CopyItem| -> BoxFuture<'static, Result<FileDescriptor>> {
            let repo = Arc::clone(&repo);
            let index_dir = index_dir.clone();
            let dest = dest.clone();
            Box::pin(async move {
                let (checksum, length) = sha256_file(&index_dir.join(&item.name)).await?;
                repo.copy_file_from(&index_dir, &item.name, &dest).await?;
                Ok(FileDescriptor {
                    name: item.name,
                    checksum,
                    length,
                })
            })
        });

        let files = self.copy_all(items, op, cancel).await?;
        Ok(report(files))
    }

    async fn run_restore(
        &self,
        task: &ShardRestoreTask,
        cancel: &CancellationToken,
    ) -> Result<ShardReport> {
        check_restore_names(task)?;
        let repo = self.registry.resolve(Some(task.repository.as_str()))?;
        let target = self.index_dir(&task.collection, &task.shard_id);
        if tokio::fs::try_exists(&target).await? {
            return Err(AgentError::IndexExists(target.display().to_string()));
        }

        let source = shard_dir(repo.as_ref(), &task.location, &task.backup_name, &task.shard_id)?;

        let shard_root = self.data_dir.join(&task.collection).join(task.shard_id.as_str());
        let staging = shard_root.join(format!(".restore-{}", task.task_id));
        tokio::fs::create_dir_all(&staging).await?;
        let mut staging_guard = StagingDir::new(staging.clone());
        let items = task
            .files
            .iter()
            .map(|f| CopyItem {
                name: f.name.clone(),
                size: f.length,
                expected: Some(f.clone()),
            })
            .collect();

        let staging_dir = staging.clone();
        let op: CopyOp = Arc::new(move |item: CopyItem| -> BoxFuture<'static, Result<FileDescriptor>> {
            let repo = Arc::clone(&repo);
            let source = source.clone();
            let staging = staging_dir.clone();
            Box::pin(async move {
                repo.copy_file_to(&source, &item.name, &staging).await?;
                let (checksum, length) = sha256_file(&staging.join(&item.name)).await?;
                verify(&item, &checksum, length)?;
                Ok(FileDescriptor {
                    name: item.name,
                    checksum,
                    length,
                })
            })
        });

        let files = self.copy_all(items, op, cancel).await?;
        tokio::fs::rename(&staging, &target).await?;
        staging_guard.installed();
        Ok(report(files))
    }

    /// Remove every local trace of a shard of `collection`: the installed
    /// index and any staging directories. Returns whether anything existed.
    pub async fn discard_shard(&self, collection: &str, shard_id: &ShardId) -> Result<bool> {
        if !is_path_component(collection) || !is_path_component(shard_id.as_str()) {
            return Err(AgentError::Task(format!(
                "invalid shard path '{collection}/{shard_id}'"
            )));
        }
        let shard_root = self.data_dir.join(collection).join(shard_id.as_str());
        if !tokio::fs::try_exists(&shard_root).await? {
            return Ok(false);
        }
        tokio::fs::remove_dir_all(&shard_root).await?;
        info!(collection, shard = %shard_id, "Discarded local shard data");
        Ok(true)
    }

    /// Run every copy with weighted concurrency and wait for all of them.
    ///
    /// Returns descriptors in item order. On failure, the error of the first
    /// failing item that was not merely cancelled is returned.
    async fn copy_all(
        &self,
        items: Vec<CopyItem>,
        op: CopyOp,
        cancel: &CancellationToken,
    ) -> Result<Vec<FileDescriptor>> {
        let semaphore = Arc::new(Semaphore::new(self.copy_budget));
        let mut handles = Vec::with_capacity(items.len());

        for item in items {
            let sem = Arc::clone(&semaphore);
            let op = Arc::clone(&op);
            let cancel = cancel.clone();
            let weight = copy_weight(item.size, self.copy_budget);

            handles.push(tokio::spawn(async move {
                if cancel.is_cancelled() {
                    return Err(AgentError::Cancelled);
                }

                let permit = tokio::select! {
                    result = sem.acquire_many_owned(weight) => {
                        result.map_err(|e| AgentError::Task(format!("semaphore closed: {e}")))?
                    }
                    _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                };

                // Cancellation may have landed while waiting for permits
                if cancel.is_cancelled() {
                    return Err(AgentError::Cancelled);
                }

                let result = op(item).await;
                drop(permit);
                result
            }));
        }

        let mut files = Vec::with_capacity(handles.len());
        let mut first_error: Option<AgentError> = None;
        for handle in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(AgentError::Task(format!("copy task failed: {e}"))),
            };
            match outcome {
                Ok(file) => files.push(file),
                Err(e) => {
                    let replace = match &first_error {
                        None => true,
                        Some(AgentError::Cancelled) => !matches!(e, AgentError::Cancelled),
                        Some(_) => false,
                    };
                    if replace {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(files),
        }
    }
}

/// Staging directory of a restore in progress. Removed on drop unless the
/// files were installed, so an abandoned restore leaves nothing behind.
struct StagingDir {
    path: PathBuf,
    installed: bool,
}

impl StagingDir {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            installed: false,
        }
    }

    fn installed(&mut self) {
        self.installed = true;
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if self.installed {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            warn!("Failed to remove staging directory {}: {}", self.path.display(), e);
        }
    }
}

/// Every name a restore turns into a local path must be a single component.
fn check_restore_names(task: &ShardRestoreTask) -> Result<()> {
    let names = [task.collection.as_str(), task.shard_id.as_str()]
        .into_iter()
        .chain(task.files.iter().map(|f| f.name.as_str()));
    for name in names {
        if !is_path_component(name) {
            return Err(AgentError::Task(format!(
                "refusing to restore '{name}': not a plain file or directory name"
            )));
        }
    }
    Ok(())
}

fn verify(item: &CopyItem, checksum: &str, length: u64) -> Result<()> {
    let Some(expected) = &item.expected else {
        return Ok(());
    };
    if expected.length != length {
        return Err(AgentError::LengthMismatch {
            file: item.name.clone(),
            expected: expected.length,
            actual: length,
        });
    }
    if expected.checksum != checksum {
        return Err(AgentError::ChecksumMismatch {
            file: item.name.clone(),
            expected: expected.checksum.clone(),
            actual: checksum.to_string(),
        });
    }
    Ok(())
}

fn report(files: Vec<FileDescriptor>) -> ShardReport {
    let bytes = files.iter().map(|f| f.length).sum();
    ShardReport {
        files,
        bytes,
        duration_ms: 0,
    }
}

fn finish(
    shard_id: ShardId,
    kind: &str,
    start: Instant,
    result: Result<ShardReport>,
) -> OperationResult {
    match result {
        Ok(mut report) => {
            report.duration_ms = start.elapsed().as_millis() as u64;
            info!(
                shard = %shard_id,
                files = report.files.len(),
                bytes = report.bytes,
                duration_ms = report.duration_ms,
                "Shard {} completed",
                kind
            );
            OperationResult::success(shard_id, report)
        }
        Err(e) => {
            warn!(shard = %shard_id, "Shard {} failed: {}", kind, e);
            OperationResult::from_error(shard_id, &e)
        }
    }
}

/// Index files of a local shard, keyed by name, with their checksums.
/// Used to compare a restored index against its source.
pub async fn describe_index(index_dir: &Path) -> Result<HashMap<String, FileDescriptor>> {
    let root = index_dir.to_path_buf();
    let files = tokio::task::spawn_blocking(move || walk_directory(&root, &WalkOptions::default()))
        .await
        .map_err(|e| AgentError::Task(format!("directory walk failed: {e}")))??;

    let mut out = HashMap::with_capacity(files.len());
    for file in files {
        let (checksum, length) = sha256_file(&file.path).await?;
        out.insert(
            file.name.clone(),
            FileDescriptor {
                name: file.name,
                checksum,
                length,
            },
        );
    }
    Ok(out)
}
