//! Shard Agent - Main entry point
//!
//! Serves shard backup and restore tasks for the coordinator.

use anyhow::Result;
use clap::Parser;
use shard_agent::{
    api,
    config::Config,
    daemon::shutdown::ShutdownCoordinator,
    repository::{RepositoryFactories, RepositoryRegistry},
    utils, ShardExecutor,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Seconds to wait for running shard tasks on shutdown
    #[arg(long, default_value_t = 30)]
    shutdown_grace: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    api::health::init_start_time();

    tracing::info!(
        "Starting shard-agent v{} (node_id: {})",
        env!("CARGO_PKG_VERSION"),
        config.agent.id
    );

    // Repository table is fixed for the life of the process
    let registry = RepositoryRegistry::from_configs(
        &config.repositories,
        &RepositoryFactories::default(),
    )?;
    if registry.default_name().is_none() {
        tracing::warn!("No default backup repository configured");
    }

    std::fs::create_dir_all(&config.agent.data_dir)?;

    let executor = Arc::new(
        ShardExecutor::new(Arc::new(registry.clone()), &config.agent.data_dir)
            .with_copy_budget(config.performance.copy_budget),
    );

    let app = api::create_router(api::AppState {
        node_id: config.agent.id.clone(),
        executor: Arc::clone(&executor),
        repositories: registry.names(),
    });

    let port = args.port.unwrap_or(config.agent.port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", addr);
    tracing::info!("Data directory: {}", config.agent.data_dir.display());

    let shutdown_coordinator = ShutdownCoordinator::new();
    let mut server_shutdown = shutdown_coordinator.subscribe();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                server_shutdown.recv().await.ok();
            })
            .await
    });

    shutdown_coordinator.wait_for_signal().await;

    shutdown_coordinator
        .drain(&executor, Duration::from_secs(args.shutdown_grace))
        .await;

    match tokio::time::timeout(Duration::from_secs(5), server_handle).await {
        Ok(Ok(Ok(()))) => tracing::info!("Server shutdown complete"),
        Ok(Ok(Err(e))) => tracing::error!("Server error during shutdown: {}", e),
        Ok(Err(e)) => tracing::error!("Server task panicked: {}", e),
        Err(_) => tracing::warn!("Server shutdown timeout, forcing exit"),
    }

    Ok(())
}
