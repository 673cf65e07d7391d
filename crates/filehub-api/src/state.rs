//! Application state shared across all handlers and middleware.

use std::sync::Arc;

use filehub_core::config::AppConfig;
use filehub_realtime::Hub;
use filehub_worker::JobQueue;

/// Shared application state passed to every handler via `State<AppState>`.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Loaded configuration.
    pub config: Arc<AppConfig>,
    /// Realtime hub that owns all live connections.
    pub hub: Hub,
    /// Job store backing the dispatcher.
    pub queue: Arc<dyn JobQueue>,
}

impl AppState {
    /// Creates the state from its parts.
    pub fn new(config: Arc<AppConfig>, hub: Hub, queue: Arc<dyn JobQueue>) -> Self {
        Self { config, hub, queue }
    }
}
