//! Backup repositories.
//!
//! A repository moves a single named file between a node-local directory and
//! a URI-addressed shared location. Every implementation honours the same
//! contract: an operation either completes the byte-for-byte transfer or fails
//! with [`RepositoryError::Io`] naming the repository, and a failed transfer
//! never leaves a destination file that looks complete.

pub mod disabled;
pub mod local;
pub mod registry;

use async_trait::async_trait;
use std::fmt::Debug;
use std::path::Path;
use thiserror::Error;
use tokio::io::AsyncRead;
use url::Url;

pub use disabled::DisabledRepository;
pub use local::LocalFileSystemRepository;
pub use registry::{RepositoryConfig, RepositoryFactories, RepositoryRegistry};

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Repository '{0}' is not configured")]
    NotFound(String),

    #[error("No repository name given and no default repository is configured")]
    NoDefault,

    #[error("Repository '{repository}' ({kind}) failed to {operation}: {source}")]
    Io {
        repository: String,
        kind: String,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unknown repository kind '{kind}' for repository '{name}'")]
    UnknownKind { name: String, kind: String },

    #[error("Invalid repository configuration: {0}")]
    Config(String),

    #[error("Invalid location '{0}'")]
    InvalidLocation(String),
}

impl RepositoryError {
    pub fn io(
        repository: &str,
        kind: &str,
        operation: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        RepositoryError::Io {
            repository: repository.to_string(),
            kind: kind.to_string(),
            operation: operation.into(),
            source,
        }
    }

    /// Name of the repository this error originated from, when known.
    pub fn repository(&self) -> Option<&str> {
        match self {
            RepositoryError::NotFound(name) => Some(name),
            RepositoryError::Io { repository, .. } => Some(repository),
            RepositoryError::UnknownKind { name, .. } => Some(name),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Readable stream over a file stored in a repository.
pub type InputStream = Box<dyn AsyncRead + Send + Unpin>;

/// Writable handle to a repository location.
///
/// Bytes written are invisible under the destination name until
/// [`OutputSink::commit`] succeeds. Dropping an uncommitted sink discards it.
#[async_trait]
pub trait OutputSink: Send {
    async fn write(&mut self, buf: &[u8]) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;
}

pub type OutputStream = Box<dyn OutputSink>;

#[async_trait]
pub trait BackupRepository: Send + Sync + Debug {
    /// Configured name, unique within a registry.
    fn name(&self) -> &str;

    /// Implementation kind, e.g. `local`.
    fn kind(&self) -> &str;

    /// Location used when a request does not name one.
    fn default_location(&self) -> Option<&Url> {
        None
    }

    /// Append path segments to a base location.
    fn resolve(&self, base: &Url, segments: &[&str]) -> Result<Url> {
        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|_| RepositoryError::InvalidLocation(base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn exists(&self, uri: &Url) -> Result<bool>;

    async fn create_directory(&self, uri: &Url) -> Result<()>;

    /// Names of the direct children of a directory location.
    async fn list(&self, dir: &Url) -> Result<Vec<String>>;

    /// Copy `file_name` from a node-local directory into the directory `dest`.
    async fn copy_file_from(&self, source_dir: &Path, file_name: &str, dest: &Url) -> Result<()>;

    /// Copy `file_name` from the directory `source` into a node-local directory.
    async fn copy_file_to(&self, source: &Url, file_name: &str, dest_dir: &Path) -> Result<()>;

    async fn open_input(&self, dir: &Url, file_name: &str) -> Result<InputStream>;

    async fn create_output(&self, uri: &Url) -> Result<OutputStream>;
}

/// Parse a location given either as a URI or as an absolute filesystem path.
///
/// Plain paths may contain whitespace; they are percent-encoded into a
/// `file` URI with a trailing slash.
pub fn parse_location(raw: &str) -> Result<Url> {
    let trimmed = raw.trim_end();
    if trimmed.is_empty() {
        return Err(RepositoryError::InvalidLocation(raw.to_string()));
    }

    let path = Path::new(trimmed);
    if path.is_absolute() {
        return Url::from_directory_path(path)
            .map_err(|_| RepositoryError::InvalidLocation(raw.to_string()));
    }

    match Url::parse(trimmed) {
        Ok(url) if !url.cannot_be_a_base() => Ok(url),
        _ => Err(RepositoryError::InvalidLocation(raw.to_string())),
    }
}
