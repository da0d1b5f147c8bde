use crate::error::AppError;
use crate::services::backup_catalog::{self, BackupSummary};
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new().route("/", get(list_backups))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    location: Option<String>,
    repository: Option<String>,
}

/// GET /api/backups?location=&repository=
async fn list_backups(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<BackupSummary>>, AppError> {
    let backups = backup_catalog::list_backups(
        &state,
        query.repository.as_deref(),
        query.location.as_deref(),
    )
    .await?;
    Ok(Json(backups))
}
