pub mod backups;
pub mod collections;
pub mod operations;

use crate::state::AppState;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api/collections", collections::router(state.clone()))
        .nest("/api/backups", backups::router(state.clone()))
        .nest("/api/operations", operations::router(state.clone()))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "repositories": state.registry.names(),
        "default_repository": state.registry.default_name(),
        "backups_in_progress": state.running_backups.len(),
    }))
}
