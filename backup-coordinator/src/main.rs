mod config;
mod error;
mod models;
mod routes;
mod services;
mod state;
#[cfg(test)]
mod test_support;

use crate::config::{AppConfig, ClusterConfig};
use crate::services::cluster_state::StaticClusterState;
use crate::services::dispatch::HttpDispatcher;
use crate::state::AppState;
use shard_agent::repository::{RepositoryFactories, RepositoryRegistry};
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .init();

    tracing::info!("Starting backup coordinator on port {}", config.port);

    let cluster_config = ClusterConfig::from_file(&config.cluster_config)?;
    tracing::info!(
        "Cluster: {} node(s), {} collection(s)",
        cluster_config.nodes.len(),
        cluster_config.collections.len()
    );

    // Repository table is fixed for the life of the process
    let registry = RepositoryRegistry::from_configs(
        &cluster_config.repositories,
        &RepositoryFactories::default(),
    )?;
    if registry.default_name().is_none() {
        tracing::warn!("No default backup repository configured");
    }

    let cluster = StaticClusterState::new(
        cluster_config.nodes.iter().map(|n| n.id.clone()).collect(),
        cluster_config.collection_infos(),
    );
    let dispatcher = HttpDispatcher::new(&cluster_config.nodes);

    let state = Arc::new(AppState::new(
        config.clone(),
        Arc::new(registry),
        Arc::new(cluster),
        Arc::new(dispatcher),
    ));

    let app = routes::create_router(state.clone());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await?;

    tracing::info!("Coordinator stopped");
    Ok(())
}

async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }

    // Running operations abort instead of publishing after shutdown starts
    let cancelled = state.operations.cancel_all();
    if cancelled > 0 {
        tracing::info!("Cancelled {} running operation(s)", cancelled);
    }
}
