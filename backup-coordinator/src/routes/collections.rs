use crate::error::AppError;
use crate::models::operation::{BackupRequest, OperationKind, RestoreRequest};
use crate::services::{backup_orchestrator, restore_orchestrator};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/{name}/backup", post(backup))
        .route("/{name}/restore", post(restore))
}

#[derive(Debug, Deserialize)]
pub struct OperationBody {
    pub backup_name: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub repository: Option<String>,
    /// Return an operation id immediately instead of waiting
    #[serde(default, rename = "async")]
    pub run_async: bool,
}

fn validate(body: &OperationBody) -> Result<(), AppError> {
    let name = body.backup_name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("backup_name is required".into()));
    }
    if name.contains('/') || name == "." || name == ".." {
        return Err(AppError::BadRequest(format!(
            "Invalid backup_name '{}'",
            body.backup_name
        )));
    }
    Ok(())
}

/// POST /api/collections/{name}/backup
async fn backup(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(body): Json<OperationBody>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    validate(&body)?;
    let op = state.operations.start(
        OperationKind::Backup,
        &name,
        &body.backup_name,
        body.repository.as_deref(),
    );
    let request = BackupRequest {
        collection: name,
        backup_name: body.backup_name,
        location: body.location,
        repository: body.repository,
    };

    if body.run_async {
        let id = op.id.clone();
        tokio::spawn(backup_orchestrator::run_backup(state.clone(), request, op));
        return Ok((StatusCode::ACCEPTED, Json(json!({ "operation_id": id }))));
    }

    let id = op.id.clone();
    let manifest = backup_orchestrator::run_backup(state.clone(), request, op).await?;
    Ok((
        StatusCode::OK,
        Json(json!({ "operation_id": id, "manifest": manifest })),
    ))
}

/// POST /api/collections/{name}/restore
async fn restore(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(body): Json<OperationBody>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    validate(&body)?;
    let op = state.operations.start(
        OperationKind::Restore,
        &name,
        &body.backup_name,
        body.repository.as_deref(),
    );
    let request = RestoreRequest {
        collection: name,
        backup_name: body.backup_name,
        location: body.location,
        repository: body.repository,
    };

    if body.run_async {
        let id = op.id.clone();
        tokio::spawn(restore_orchestrator::run_restore(state.clone(), request, op));
        return Ok((StatusCode::ACCEPTED, Json(json!({ "operation_id": id }))));
    }

    let id = op.id.clone();
    let collection = restore_orchestrator::run_restore(state.clone(), request, op).await?;
    Ok((
        StatusCode::OK,
        Json(json!({ "operation_id": id, "collection": collection })),
    ))
}
