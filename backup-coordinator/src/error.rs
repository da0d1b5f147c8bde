use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use shard_agent::manifest::ManifestError;
use shard_agent::{RepositoryError, ShardId};

/// Coarse error category reported to admin callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    BadRequest,
    ServerError,
}

impl ErrorCode {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            ErrorCode::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Failure of a collection-level backup or restore.
#[derive(thiserror::Error, Debug)]
pub enum CollectionError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("No backup named '{backup_name}' found at {location}")]
    ManifestNotFound { backup_name: String, location: String },

    #[error("{0}")]
    InvalidManifest(String),

    #[error(
        "{operation} of collection '{collection}' with repository '{repository}' failed on \
         {failed} of {total} shard(s); {shard_id}: {reason}"
    )]
    PartialFailure {
        operation: &'static str,
        collection: String,
        repository: String,
        failed: usize,
        total: usize,
        shard_id: ShardId,
        reason: String,
        cause: Option<String>,
    },

    #[error("Collection '{0}' does not exist")]
    CollectionNotFound(String),

    #[error("Collection '{0}' already exists")]
    CollectionExists(String),

    #[error("Backup '{backup_name}' already exists at {location}")]
    BackupExists { backup_name: String, location: String },

    #[error("Backup '{backup_name}' at {location} is already in progress")]
    BackupInProgress { backup_name: String, location: String },

    #[error("No location given and repository '{0}' has no default location")]
    MissingLocation(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Cluster state error: {0:#}")]
    Cluster(anyhow::Error),
}

impl CollectionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CollectionError::Repository(RepositoryError::InvalidLocation(_))
            | CollectionError::CollectionNotFound(_)
            | CollectionError::CollectionExists(_)
            | CollectionError::BackupExists { .. }
            | CollectionError::BackupInProgress { .. }
            | CollectionError::MissingLocation(_) => ErrorCode::BadRequest,
            _ => ErrorCode::ServerError,
        }
    }
}

impl From<ManifestError> for CollectionError {
    fn from(err: ManifestError) -> Self {
        match err {
            ManifestError::Repository(e) => CollectionError::Repository(e),
            invalid @ ManifestError::Invalid { .. } => {
                CollectionError::InvalidManifest(invalid.to_string())
            }
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Collection(#[from] CollectionError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            // Operators need the real message, e.g. which repository failed
            AppError::Collection(e) => {
                let code = e.code();
                if code == ErrorCode::ServerError {
                    tracing::error!("Collection operation failed: {e}");
                }
                (code.status(), e.to_string())
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
            }
        };
        (
            status,
            Json(json!({ "error": msg, "code": status.as_u16() })),
        )
            .into_response()
    }
}
