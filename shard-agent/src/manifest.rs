//! Backup manifest.
//!
//! The manifest is the durable description of a completed backup. It lives at
//! `<location>/<backup name>/backup_manifest.json`, next to one directory per
//! shard, and is written last: its presence is what marks a backup complete.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::info;
use url::Url;

use crate::repository::{BackupRepository, RepositoryError};
use crate::task::ShardId;

pub const MANIFEST_FILE: &str = "backup_manifest.json";
pub const MANIFEST_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("Manifest for backup '{backup_name}' is invalid: {reason}")]
    Invalid { backup_name: String, reason: String },
}

/// One copied file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub name: String,
    /// Lower-hex SHA-256
    pub checksum: String,
    pub length: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardManifest {
    pub shard_id: ShardId,
    pub leader_replica_id: String,
    /// Sorted by name, no duplicates
    pub files: Vec<FileDescriptor>,
}

impl ShardManifest {
    pub fn bytes(&self) -> u64 {
        self.files.iter().map(|f| f.length).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub version: u32,
    pub collection_name: String,
    pub backup_name: String,
    pub location: Url,
    /// Repository the backup was written through
    pub repository: String,
    pub created_at: DateTime<Utc>,
    /// Collection configuration snapshot
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// Ordered by shard id
    pub shards: Vec<ShardManifest>,
}

impl BackupManifest {
    pub fn new(
        collection_name: impl Into<String>,
        backup_name: impl Into<String>,
        location: Url,
        repository: impl Into<String>,
        properties: BTreeMap<String, String>,
        mut shards: Vec<ShardManifest>,
    ) -> Self {
        shards.sort_by(|a, b| a.shard_id.cmp(&b.shard_id));
        for shard in &mut shards {
            shard.files.sort_by(|a, b| a.name.cmp(&b.name));
        }
        Self {
            version: MANIFEST_VERSION,
            collection_name: collection_name.into(),
            backup_name: backup_name.into(),
            location,
            repository: repository.into(),
            created_at: Utc::now(),
            properties,
            shards,
        }
    }

    pub fn total_files(&self) -> usize {
        self.shards.iter().map(|s| s.files.len()).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.shards.iter().map(|s| s.bytes()).sum()
    }

    pub fn shard(&self, shard_id: &ShardId) -> Option<&ShardManifest> {
        self.shards.iter().find(|s| &s.shard_id == shard_id)
    }

    fn validate(&self, expected_backup: &str) -> Result<(), ManifestError> {
        let invalid = |reason: String| ManifestError::Invalid {
            backup_name: expected_backup.to_string(),
            reason,
        };

        if self.version != MANIFEST_VERSION {
            return Err(invalid(format!("unsupported version {}", self.version)));
        }
        if self.backup_name != expected_backup {
            return Err(invalid(format!("records backup '{}'", self.backup_name)));
        }
        if self.shards.is_empty() {
            return Err(invalid("no shards recorded".into()));
        }

        let mut seen = HashSet::new();
        for shard in &self.shards {
            if !is_path_component(shard.shard_id.as_str()) {
                return Err(invalid(format!("shard id '{}' is not a plain name", shard.shard_id)));
            }
            if !seen.insert(&shard.shard_id) {
                return Err(invalid(format!("shard {} listed twice", shard.shard_id)));
            }
            let mut names = HashSet::new();
            for file in &shard.files {
                if !is_path_component(&file.name) {
                    return Err(invalid(format!(
                        "file '{}' of shard {} is not a plain name",
                        file.name, shard.shard_id
                    )));
                }
                if !names.insert(file.name.as_str()) {
                    return Err(invalid(format!(
                        "file '{}' listed twice for shard {}",
                        file.name, shard.shard_id
                    )));
                }
            }
        }
        Ok(())
    }
}

/// True when `name` can be joined onto a directory without leaving it:
/// non-empty, no separators, and not `.` or `..`.
pub fn is_path_component(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\', '\0'])
}

/// Directory holding one backup's manifest and shard directories.
pub fn backup_dir(
    repo: &dyn BackupRepository,
    location: &Url,
    backup_name: &str,
) -> Result<Url, RepositoryError> {
    repo.resolve(location, &[backup_name])
}

/// Directory holding one shard's copied files.
pub fn shard_dir(
    repo: &dyn BackupRepository,
    location: &Url,
    backup_name: &str,
    shard_id: &ShardId,
) -> Result<Url, RepositoryError> {
    repo.resolve(location, &[backup_name, shard_id.as_str()])
}

pub async fn manifest_exists(
    repo: &dyn BackupRepository,
    location: &Url,
    backup_name: &str,
) -> Result<bool, RepositoryError> {
    let uri = repo.resolve(location, &[backup_name, MANIFEST_FILE])?;
    repo.exists(&uri).await
}

/// Publish a manifest. The file becomes visible in one step.
pub async fn write_manifest(
    repo: &dyn BackupRepository,
    manifest: &BackupManifest,
) -> Result<Url, ManifestError> {
    let uri = repo.resolve(&manifest.location, &[manifest.backup_name.as_str(), MANIFEST_FILE])?;
    let body = serde_json::to_vec_pretty(manifest).map_err(|e| ManifestError::Invalid {
        backup_name: manifest.backup_name.clone(),
        reason: e.to_string(),
    })?;

    let mut out = repo.create_output(&uri).await?;
    out.write(&body).await?;
    out.commit().await?;

    info!(
        repository = repo.name(),
        backup = %manifest.backup_name,
        shards = manifest.shards.len(),
        files = manifest.total_files(),
        "Published backup manifest"
    );
    Ok(uri)
}

/// Read a backup's manifest. `None` when no manifest exists at the location.
pub async fn read_manifest(
    repo: &dyn BackupRepository,
    location: &Url,
    backup_name: &str,
) -> Result<Option<BackupManifest>, ManifestError> {
    if !manifest_exists(repo, location, backup_name).await? {
        return Ok(None);
    }

    let dir = backup_dir(repo, location, backup_name)?;
    let mut input = repo.open_input(&dir, MANIFEST_FILE).await?;
    let mut body = Vec::new();
    input.read_to_end(&mut body).await.map_err(|e| {
        RepositoryError::io(repo.name(), repo.kind(), format!("read {MANIFEST_FILE}"), e)
    })?;

    let manifest: BackupManifest =
        serde_json::from_slice(&body).map_err(|e| ManifestError::Invalid {
            backup_name: backup_name.to_string(),
            reason: e.to_string(),
        })?;
    manifest.validate(backup_name)?;
    Ok(Some(manifest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::LocalFileSystemRepository;
    use tempfile::TempDir;

    fn sample(location: Url) -> BackupManifest {
        let file = |name: &str, length| FileDescriptor {
            name: name.to_string(),
            checksum: "00".repeat(32),
            length,
        };
        BackupManifest::new(
            "books",
            "nightly",
            location,
            "local",
            BTreeMap::from([("config_set".to_string(), "conf1".to_string())]),
            vec![
                ShardManifest {
                    shard_id: ShardId::from("shard10"),
                    leader_replica_id: "core_node3".into(),
                    files: vec![file("segments_1", 10)],
                },
                ShardManifest {
                    shard_id: ShardId::from("shard2"),
                    leader_replica_id: "core_node2".into(),
                    files: vec![file("segments_1", 5), file("_0.cfs", 20)],
                },
            ],
        )
    }

    #[test]
    fn test_new_orders_shards_and_files() {
        let manifest = sample(Url::parse("file:///backups/").unwrap());
        assert_eq!(manifest.shards[0].shard_id.as_str(), "shard2");
        assert_eq!(manifest.shards[0].files[0].name, "_0.cfs");
        assert_eq!(manifest.total_files(), 3);
        assert_eq!(manifest.total_bytes(), 35);
    }

    #[tokio::test]
    async fn test_write_then_read() -> anyhow::Result<()> {
        let shared = TempDir::new()?;
        let location = Url::from_directory_path(shared.path()).unwrap();
        let repo = LocalFileSystemRepository::new("local", None);

        assert!(read_manifest(&repo, &location, "nightly").await?.is_none());

        let manifest = sample(location.clone());
        write_manifest(&repo, &manifest).await?;

        let read = read_manifest(&repo, &location, "nightly").await?.unwrap();
        assert_eq!(read, manifest);
        assert!(shared.path().join("nightly").join(MANIFEST_FILE).exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_corrupt_manifest_is_invalid() -> anyhow::Result<()> {
        let shared = TempDir::new()?;
        std::fs::create_dir(shared.path().join("nightly"))?;
        std::fs::write(shared.path().join("nightly").join(MANIFEST_FILE), b"{ not json")?;
        let location = Url::from_directory_path(shared.path()).unwrap();
        let repo = LocalFileSystemRepository::new("local", None);

        let err = read_manifest(&repo, &location, "nightly").await.unwrap_err();
        assert!(matches!(err, ManifestError::Invalid { .. }));
        Ok(())
    }

    #[test]
    fn test_validate_rejects_duplicate_shards() {
        let mut manifest = sample(Url::parse("file:///backups/").unwrap());
        let dup = manifest.shards[0].clone();
        manifest.shards.push(dup);
        assert!(manifest.validate("nightly").is_err());
        assert!(sample(Url::parse("file:///b/").unwrap()).validate("other").is_err());
    }

    #[test]
    fn test_path_components() {
        for ok in ["shard1", "_0.cfs", "segments_1", ".hidden", "a..b"] {
            assert!(is_path_component(ok), "{ok}");
        }
        for bad in ["", ".", "..", "../x", "a/b", "a\\b", "/abs"] {
            assert!(!is_path_component(bad), "{bad}");
        }
    }

    #[tokio::test]
    async fn test_traversing_names_are_invalid() -> anyhow::Result<()> {
        let shared = TempDir::new()?;
        let location = Url::from_directory_path(shared.path()).unwrap();
        let repo = LocalFileSystemRepository::new("local", None);

        let mut manifest = sample(location.clone());
        manifest.shards[0].shard_id = ShardId::from("../outside");
        write_manifest(&repo, &manifest).await?;
        let err = read_manifest(&repo, &location, "nightly").await.unwrap_err();
        assert!(err.to_string().contains("../outside"), "{err}");

        let mut manifest = sample(location.clone());
        manifest.shards[1].files[0].name = "..".into();
        write_manifest(&repo, &manifest).await?;
        let err = read_manifest(&repo, &location, "nightly").await.unwrap_err();
        assert!(matches!(err, ManifestError::Invalid { .. }));
        Ok(())
    }
}
