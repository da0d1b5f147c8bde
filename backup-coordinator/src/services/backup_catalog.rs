use chrono::{DateTime, Utc};
use serde::Serialize;
use shard_agent::manifest;

use crate::error::CollectionError;
use crate::services::location::resolve_location;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct BackupSummary {
    pub backup_name: String,
    pub collection: String,
    pub repository: String,
    pub location: String,
    pub created_at: DateTime<Utc>,
    pub shards: usize,
    pub files: usize,
    pub bytes: u64,
}

/// Completed backups at a location. Directories without a manifest are
/// in-progress or abandoned and are skipped.
pub async fn list_backups(
    state: &AppState,
    repository: Option<&str>,
    location: Option<&str>,
) -> Result<Vec<BackupSummary>, CollectionError> {
    let repo = state.registry.resolve(repository)?;
    let location = resolve_location(repo.as_ref(), location)?;

    if !repo.exists(&location).await? {
        return Ok(Vec::new());
    }

    let mut backups = Vec::new();
    for name in repo.list(&location).await? {
        match manifest::read_manifest(repo.as_ref(), &location, &name).await {
            Ok(Some(m)) => backups.push(BackupSummary {
                backup_name: m.backup_name.clone(),
                collection: m.collection_name.clone(),
                repository: m.repository.clone(),
                location: m.location.to_string(),
                created_at: m.created_at,
                shards: m.shards.len(),
                files: m.total_files(),
                bytes: m.total_bytes(),
            }),
            Ok(None) => {}
            Err(e) => tracing::warn!(backup = %name, "Skipping unreadable backup: {e}"),
        }
    }

    backups.sort_by(|a, b| a.backup_name.cmp(&b.backup_name));
    Ok(backups)
}
