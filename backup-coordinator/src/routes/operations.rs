use crate::error::AppError;
use crate::models::operation::OperationStatus;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_operations))
        .route("/{id}", get(get_operation))
        .route("/{id}/cancel", post(cancel_operation))
}

async fn list_operations(State(state): State<Arc<AppState>>) -> Json<Vec<OperationStatus>> {
    Json(state.operations.list())
}

async fn get_operation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OperationStatus>, AppError> {
    state
        .operations
        .get(&id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Operation not found".into()))
}

async fn cancel_operation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    match state.operations.cancel(&id) {
        None => Err(AppError::NotFound("Operation not found".into())),
        Some(false) => Err(AppError::BadRequest("Operation already finished".into())),
        Some(true) => Ok(Json(json!({ "ok": true, "status": "cancelling" }))),
    }
}
