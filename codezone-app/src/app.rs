//! Application state.

use std::sync::Arc;
use std::time::Duration;

use codezone_executor::{ExecutionManager, ExecutorOptions};

/// Long-lived application state; one per process.
///
/// Cheap to clone and share across command handlers.
#[derive(Clone)]
pub struct App {
    manager: Arc<ExecutionManager>,
}

impl App {
    /// Creates the app with the shell's defaults: a generous deadline for
    /// potentially long-running code and a larger sandbox heap.
    pub fn new() -> Self {
        Self::with_options(ExecutorOptions {
            timeout: Duration::from_secs(15),
            memory_mb: 128,
            ..ExecutorOptions::default()
        })
    }

    pub fn with_options(options: ExecutorOptions) -> Self {
        Self {
            manager: Arc::new(ExecutionManager::new(options)),
        }
    }

    pub fn manager(&self) -> &ExecutionManager {
        &self.manager
    }

    /// Releases every long-lived resource. Called once, just before the
    /// shell closes.
    pub async fn shutdown(&self) {
        tracing::info!("starting shutdown");

        let postgres = self.manager.postgres().await;
        if postgres.is_connected().await {
            tracing::info!("disconnecting PostgreSQL before shutdown");
            postgres.disconnect().await;
        }

        self.manager.shutdown().await;
        tracing::info!("shutdown complete");
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}
