//! A repository that refuses every operation.
//!
//! Operators configure one to keep a name reserved while its storage is
//! unavailable. Requests that pick it fail with an error naming it.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use url::Url;

use super::{BackupRepository, InputStream, OutputStream, RepositoryError, Result};

pub const KIND: &str = "disabled";

#[derive(Debug, Clone)]
pub struct DisabledRepository {
    name: String,
    reason: String,
}

impl DisabledRepository {
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Build from repository options. Recognises `reason`.
    pub fn from_options(name: &str, options: &BTreeMap<String, String>) -> Self {
        let reason = options
            .get("reason")
            .cloned()
            .unwrap_or_else(|| "repository is disabled".to_string());
        Self::new(name, reason)
    }

    fn refuse(&self, operation: impl Into<String>) -> RepositoryError {
        RepositoryError::io(
            &self.name,
            KIND,
            operation,
            io::Error::new(io::ErrorKind::Unsupported, self.reason.clone()),
        )
    }
}

#[async_trait]
impl BackupRepository for DisabledRepository {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        KIND
    }

    async fn exists(&self, uri: &Url) -> Result<bool> {
        Err(self.refuse(format!("check {uri}")))
    }

    async fn create_directory(&self, uri: &Url) -> Result<()> {
        Err(self.refuse(format!("create directory {uri}")))
    }

    async fn list(&self, dir: &Url) -> Result<Vec<String>> {
        Err(self.refuse(format!("list {dir}")))
    }

    async fn copy_file_from(&self, _source_dir: &Path, file_name: &str, dest: &Url) -> Result<()> {
        Err(self.refuse(format!("copy '{file_name}' to {dest}")))
    }

    async fn copy_file_to(&self, source: &Url, file_name: &str, _dest_dir: &Path) -> Result<()> {
        Err(self.refuse(format!("copy '{file_name}' from {source}")))
    }

    async fn open_input(&self, dir: &Url, file_name: &str) -> Result<InputStream> {
        Err(self.refuse(format!("open '{file_name}' in {dir}")))
    }

    async fn create_output(&self, uri: &Url) -> Result<OutputStream> {
        Err(self.refuse(format!("create {uri}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_operation_fails_with_name() {
        let repo = DisabledRepository::new("offsite", "maintenance window");
        let url = Url::parse("file:///srv/backups/").unwrap();

        let errors = vec![
            repo.exists(&url).await.unwrap_err(),
            repo.create_directory(&url).await.unwrap_err(),
            repo.copy_file_from(Path::new("/data"), "_0.cfs", &url).await.unwrap_err(),
            repo.copy_file_to(&url, "_0.cfs", Path::new("/data")).await.unwrap_err(),
        ];
        for err in errors {
            let msg = err.to_string();
            assert!(msg.contains("offsite"), "{msg}");
            assert!(msg.contains("maintenance window"), "{msg}");
        }
        assert!(repo.open_input(&url, "x").await.is_err());
        assert!(repo.create_output(&url).await.is_err());
    }
}
