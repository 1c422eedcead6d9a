//! AutoPost worker: automation job queue and posting scheduler.
//!
//! Main entry point that wires the crates together, starts the queue
//! controller and runs until a shutdown signal arrives.

use std::sync::Arc;

use async_trait::async_trait;
use tracing_subscriber::{EnvFilter, fmt};

use autopost_core::config::AppConfig;
use autopost_core::error::AppError;
use autopost_entity::schedule::PostAssignment;
use autopost_worker::backpressure::SharedUsage;
use autopost_worker::events::QueueEvent;
use autopost_worker::jobs::{PostingExecutor, Publisher};
use autopost_worker::{ControllerState, QueueController};

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
        tracing::error!("Worker error: {}", e);
        std::process::exit(1);
    }
}

/// Load configuration from files and environment
fn load_configuration() -> Result<AppConfig, AppError> {
    let env = std::env::var("AUTOPOST_ENV").unwrap_or_else(|_| "development".to_string());
    AppConfig::load(&env)
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

/// Publisher that logs instead of calling platform APIs.
#[derive(Debug)]
struct DryRunPublisher;

#[async_trait]
impl Publisher for DryRunPublisher {
    async fn publish(&self, assignment: &PostAssignment) -> Result<(), AppError> {
        tracing::info!(
            "[dry-run] would publish '{}' to {} with {} hashtags",
            assignment.content_id,
            assignment.platform,
            assignment.hashtags.len()
        );
        Ok(())
    }
}

/// Main worker run function
async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting AutoPost worker v{}", env!("CARGO_PKG_VERSION"));

    // ── Step 1: Resource probe ───────────────────────────────────
    let usage = SharedUsage::new();

    // ── Step 2: Queue controller ─────────────────────────────────
    let (controller, controller_task) = QueueController::builder(&config)
        .executor(Arc::new(PostingExecutor::new(Arc::new(DryRunPublisher))))
        .probe(Arc::new(usage))
        .spawn();

    // ── Step 3: Event log ────────────────────────────────────────
    let mut events = controller.subscribe();
    let event_logger = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let QueueEvent::ControllerStateChanged {
                state: ControllerState::Completed,
                ..
            } = event
            {
                tracing::info!("All submitted work has drained");
            }
        }
    });

    controller.start().await?;
    tracing::info!(
        "AutoPost worker ready (max_workers={})",
        config.worker.max_workers
    );

    // ── Step 4: Graceful shutdown ────────────────────────────────
    tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("Shutdown signal received, starting graceful shutdown...");
            controller.shutdown().await?;
        }
        result = wait_for_exit(&controller) => result?,
    }

    event_logger.abort();
    match controller_task.await {
        Ok(result) => result?,
        Err(e) => return Err(AppError::internal(format!("Controller task panicked: {e}"))),
    }

    tracing::info!("AutoPost worker shut down complete");
    Ok(())
}

/// Resolves if the controller faults on its own.
async fn wait_for_exit(controller: &QueueController) -> Result<(), AppError> {
    controller.wait_for_state(ControllerState::Faulted).await?;
    Err(AppError::internal("Queue controller faulted"))
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
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
