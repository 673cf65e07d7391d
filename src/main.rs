//! FileHub server: realtime event hub and background job engine
//!
//! Main entry point that wires all crates together and starts the server.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing;
use tracing_subscriber::{EnvFilter, fmt};

use filehub_api::{AppState, build_router};
use filehub_core::config::AppConfig;
use filehub_core::error::AppError;
use filehub_realtime::Hub;
use filehub_worker::jobs::NotificationJobHandler;
use filehub_worker::scheduler::unhandled_schedules;
use filehub_worker::{
    CronScheduler, Dispatcher, HandlerRegistry, HubJobObserver, JobQueue, MemoryJobQueue,
    PgJobQueue,
};

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

/// Load configuration from `config/` and the environment
fn load_configuration() -> Result<AppConfig, AppError> {
    let env = std::env::var("FILEHUB_ENV").unwrap_or_else(|_| "development".to_string());
    let dir = std::env::var("FILEHUB_CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
    AppConfig::load_from(&dir, &env)
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Main server run function
async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting FileHub v{}", env!("CARGO_PKG_VERSION"));
    let config = Arc::new(config);

    // ── Step 1: Job store ────────────────────────────────────────
    let queue = open_queue(&config).await?;

    // ── Step 2: Realtime hub ─────────────────────────────────────
    let hub = Hub::new(config.realtime.clone());

    // ── Step 3: Job handlers ─────────────────────────────────────
    let mut handlers = HandlerRegistry::new();
    handlers.register(Arc::new(NotificationJobHandler::new(hub.clone())));
    tracing::info!(types = ?handlers.registered_types(), "Job handlers registered");
    for schedule in unhandled_schedules(&config.worker.schedules, &handlers) {
        tracing::warn!(
            job_type = %schedule.job_type,
            cron = %schedule.cron,
            "Scheduled job type has no handler, its runs will fail"
        );
    }

    // ── Step 4: Dispatcher ───────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker_handle = if config.worker.enabled {
        let dispatcher = Dispatcher::new(Arc::clone(&queue), Arc::new(handlers), &config.worker)
            .with_observer(Arc::new(HubJobObserver::new(hub.clone())));
        let worker_shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            dispatcher.run(worker_shutdown).await;
        }))
    } else {
        tracing::info!("Job dispatcher disabled");
        None
    };

    // ── Step 5: Cron scheduler ───────────────────────────────────
    let mut scheduler = if config.worker.enabled {
        let mut scheduler = CronScheduler::new(Arc::clone(&queue)).await?;
        scheduler.register_all(&config.worker.schedules).await?;
        scheduler.start().await?;
        Some(scheduler)
    } else {
        None
    };

    // ── Step 6: HTTP server ──────────────────────────────────────
    let state = AppState::new(Arc::clone(&config), hub.clone(), queue);
    let app = build_router(state);

    let addr = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::internal(format!("Failed to bind {}: {}", addr, e)))?;
    tracing::info!("FileHub server listening on {}", addr);

    // ── Step 7: Graceful shutdown ────────────────────────────────
    let shutdown_hub = hub.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received, starting graceful shutdown...");
        shutdown_hub.shutdown().await;
        let _ = shutdown_tx.send(true);
    });

    server
        .await
        .map_err(|e| AppError::internal(format!("Server error: {}", e)))?;

    tracing::info!("Waiting for background tasks to complete...");

    if let Some(scheduler) = scheduler.as_mut() {
        if let Err(e) = scheduler.shutdown().await {
            tracing::warn!("Scheduler shutdown failed: {}", e);
        }
    }
    if let Some(handle) = worker_handle {
        let grace = Duration::from_secs(config.worker.shutdown_grace_seconds + 5);
        if tokio::time::timeout(grace, handle).await.is_err() {
            tracing::warn!("Dispatcher did not stop within the grace period");
        }
    }

    tracing::info!("FileHub server shut down gracefully");
    Ok(())
}

/// PostgreSQL when a database URL is configured, otherwise in memory.
async fn open_queue(config: &AppConfig) -> Result<Arc<dyn JobQueue>, AppError> {
    if !config.database.is_configured() {
        tracing::warn!("No database URL configured, jobs are kept in memory only");
        return Ok(Arc::new(MemoryJobQueue::new()));
    }

    let queue = PgJobQueue::connect(&config.database).await?;
    if config.database.run_migrations {
        queue.migrate().await?;
    }

    Ok(Arc::new(queue))
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
