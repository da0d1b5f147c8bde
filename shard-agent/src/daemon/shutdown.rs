//! Graceful shutdown handling for SIGTERM and SIGINT.
//!
//! Running shard tasks are never interrupted mid-copy: on shutdown the agent
//! cancels them (no new file copies start) and waits for in-flight copies to
//! drain, up to a grace period.

use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::executor::ShardExecutor;

/// Shutdown coordinator
pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<()>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self { shutdown_tx }
    }

    /// Get a shutdown receiver
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Wait for shutdown signal (SIGTERM or SIGINT)
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
            }
            _ = terminate => {
                info!("Received SIGTERM, initiating graceful shutdown...");
            }
        }

        self.trigger();
    }

    /// Broadcast shutdown to all subscribers
    pub fn trigger(&self) {
        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Failed to broadcast shutdown signal: {}", e);
        }
    }

    /// Wait for running shard tasks to finish, polling until `grace` elapses.
    /// Returns the number of tasks still running at the deadline.
    pub async fn drain(&self, executor: &ShardExecutor, grace: Duration) -> usize {
        let signalled = executor.jobs().cancel_all();
        if signalled > 0 {
            info!("Waiting for {} shard task(s) to finish in-flight copies", signalled);
        }

        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let running = executor.jobs().running_count();
            if running == 0 {
                info!("Graceful shutdown complete");
                return 0;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!("{} shard task(s) still running at shutdown deadline", running);
                return running;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
