//! Repository backed by a filesystem path.
//!
//! The location has to be visible to every node (a shared or network mount)
//! even though it is accessed through the ordinary file APIs.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use url::Url;

use super::{
    parse_location, BackupRepository, InputStream, OutputSink, OutputStream, RepositoryError,
    Result,
};

pub const KIND: &str = "local";

/// Suffix of in-progress files. Such files are never reported by `list`.
const PARTIAL_SUFFIX: &str = ".partial";

#[derive(Debug, Clone)]
pub struct LocalFileSystemRepository {
    name: String,
    default_location: Option<Url>,
}

impl LocalFileSystemRepository {
    pub fn new(name: impl Into<String>, default_location: Option<Url>) -> Self {
        Self {
            name: name.into(),
            default_location,
        }
    }

    /// Build from repository options. Recognises `location`.
    pub fn from_options(name: &str, options: &BTreeMap<String, String>) -> Result<Self> {
        let default_location = options
            .get("location")
            .map(|raw| parse_location(raw))
            .transpose()?;
        Ok(Self::new(name, default_location))
    }

    fn err(&self, operation: impl Into<String>, source: io::Error) -> RepositoryError {
        RepositoryError::io(&self.name, KIND, operation, source)
    }

    fn to_path(&self, uri: &Url) -> Result<PathBuf> {
        if uri.scheme() != "file" {
            return Err(self.err(
                format!("access {uri}"),
                io::Error::new(io::ErrorKind::InvalidInput, "only file:// locations are supported"),
            ));
        }
        uri.to_file_path().map_err(|_| {
            self.err(
                format!("access {uri}"),
                io::Error::new(io::ErrorKind::InvalidInput, "not a valid file path"),
            )
        })
    }
}

/// Copy `src` to `dest_dir/file_name` through a temp file in `dest_dir`.
///
/// The destination name only appears once the copy is synced.
async fn atomic_copy(src: &Path, dest_dir: &Path, file_name: &str) -> io::Result<u64> {
    let dest = dest_dir.join(file_name);
    let temp = dest_dir.join(temp_name(file_name));

    let copied = async {
        let bytes = fs::copy(src, &temp).await?;
        fs::File::open(&temp).await?.sync_all().await?;
        fs::rename(&temp, &dest).await?;
        Ok::<_, io::Error>(bytes)
    }
    .await;

    if copied.is_err() {
        if let Err(e) = fs::remove_file(&temp).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove partial file {}: {}", temp.display(), e);
            }
        }
    }
    copied
}

fn temp_name(file_name: &str) -> String {
    format!(".{}.{}{}", file_name, uuid::Uuid::new_v4().simple(), PARTIAL_SUFFIX)
}

#[async_trait]
impl BackupRepository for LocalFileSystemRepository {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        KIND
    }

    fn default_location(&self) -> Option<&Url> {
        self.default_location.as_ref()
    }

    async fn exists(&self, uri: &Url) -> Result<bool> {
        let path = self.to_path(uri)?;
        fs::try_exists(&path)
            .await
            .map_err(|e| self.err(format!("check {}", path.display()), e))
    }

    async fn create_directory(&self, uri: &Url) -> Result<()> {
        let path = self.to_path(uri)?;
        fs::create_dir_all(&path)
            .await
            .map_err(|e| self.err(format!("create directory {}", path.display()), e))
    }

    async fn list(&self, dir: &Url) -> Result<Vec<String>> {
        let path = self.to_path(dir)?;
        let op = || format!("list {}", path.display());

        let mut entries = fs::read_dir(&path).await.map_err(|e| self.err(op(), e))?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| self.err(op(), e))? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(PARTIAL_SUFFIX) {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    async fn copy_file_from(&self, source_dir: &Path, file_name: &str, dest: &Url) -> Result<()> {
        let dest_dir = self.to_path(dest)?;
        let bytes = atomic_copy(&source_dir.join(file_name), &dest_dir, file_name)
            .await
            .map_err(|e| self.err(format!("copy '{}' to {}", file_name, dest_dir.display()), e))?;
        debug!(repository = %self.name, file = file_name, bytes, "Copied file to repository");
        Ok(())
    }

    async fn copy_file_to(&self, source: &Url, file_name: &str, dest_dir: &Path) -> Result<()> {
        let source_dir = self.to_path(source)?;
        let bytes = atomic_copy(&source_dir.join(file_name), dest_dir, file_name)
            .await
            .map_err(|e| {
                self.err(
                    format!("copy '{}' from {}", file_name, source_dir.display()),
                    e,
                )
            })?;
        debug!(repository = %self.name, file = file_name, bytes, "Copied file from repository");
        Ok(())
    }

    async fn open_input(&self, dir: &Url, file_name: &str) -> Result<InputStream> {
        let path = self.to_path(dir)?.join(file_name);
        let file = fs::File::open(&path)
            .await
            .map_err(|e| self.err(format!("open {}", path.display()), e))?;
        Ok(Box::new(file))
    }

    async fn create_output(&self, uri: &Url) -> Result<OutputStream> {
        let path = self.to_path(uri)?;
        let op = || format!("create {}", path.display());

        let (parent, file_name) = match (path.parent(), path.file_name()) {
            (Some(parent), Some(name)) => (parent.to_path_buf(), name.to_string_lossy().to_string()),
            _ => {
                return Err(self.err(
                    op(),
                    io::Error::new(io::ErrorKind::InvalidInput, "location has no file name"),
                ))
            }
        };
        fs::create_dir_all(&parent).await.map_err(|e| self.err(op(), e))?;

        let temp_path = parent.join(temp_name(&file_name));
        let file = fs::File::create(&temp_path)
            .await
            .map_err(|e| self.err(op(), e))?;

        Ok(Box::new(LocalOutput {
            repository: self.name.clone(),
            temp_path,
            final_path: path,
            file: Some(file),
            committed: false,
        }))
    }
}

struct LocalOutput {
    repository: String,
    temp_path: PathBuf,
    final_path: PathBuf,
    file: Option<fs::File>,
    committed: bool,
}

impl LocalOutput {
    fn err(&self, source: io::Error) -> RepositoryError {
        RepositoryError::io(
            &self.repository,
            KIND,
            format!("write {}", self.final_path.display()),
            source,
        )
    }

    fn closed() -> io::Error {
        io::Error::new(io::ErrorKind::BrokenPipe, "output already committed")
    }
}

#[async_trait]
impl OutputSink for LocalOutput {
    async fn write(&mut self, buf: &[u8]) -> Result<()> {
        let result = match self.file.as_mut() {
            Some(file) => file.write_all(buf).await,
            None => Err(Self::closed()),
        };
        result.map_err(|e| self.err(e))
    }

    async fn commit(&mut self) -> Result<()> {
        let Some(mut file) = self.file.take() else {
            return Err(self.err(Self::closed()));
        };
        let result = async {
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&self.temp_path, &self.final_path).await
        }
        .await;
        result.map_err(|e| self.err(e))?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for LocalOutput {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.temp_path);
        }
    }
}
