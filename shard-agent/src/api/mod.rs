//! HTTP API module for the shard agent.

pub mod health;
pub mod shards;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::executor::ShardExecutor;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub node_id: String,
    pub executor: Arc<ShardExecutor>,
    pub repositories: Vec<String>,
}

/// Create the API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health::health))
        .route("/version", get(health::version))
        // Shard task endpoints
        .route("/shards/backup", post(shards::backup_shard))
        .route("/shards/restore", post(shards::restore_shard))
        .route("/shards/cancel", post(shards::cancel_task))
        .route("/shards/discard", post(shards::discard_shard))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
