//! Server initialization and main run loop

use super::agents::register_builtin_agents;
use super::config::AppConfig;
use super::loader::load_config;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use switchyard_core::{Coordinator, EventKind, MemoryStore};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A running fabric plus the handles the server needs around it
pub struct Fabric {
    pub coordinator: Arc<Coordinator>,
    pub store: Arc<MemoryStore>,
}

/// Start the coordinator and register the built-in agents.
pub async fn start_fabric(config: &AppConfig) -> Result<Fabric> {
    let store = Arc::new(MemoryStore::new());
    let coordinator = Coordinator::start(config.fabric()?, store.clone())
        .context("Failed to start coordinator")?;
    register_builtin_agents(&coordinator, &config.agents).await?;
    Ok(Fabric { coordinator, store })
}

/// Run the server
pub async fn run() -> Result<()> {
    info!("Starting Switchyard v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config().context("Failed to load configuration")?;
    info!("Configuration loaded");

    let fabric = start_fabric(&config).await?;
    let background = CancellationToken::new();
    start_event_logger(&fabric.coordinator, background.child_token());
    start_cleanup_task(
        &fabric.store,
        Duration::from_secs(config.store.cleanup_interval_secs.max(1)),
        background.child_token(),
    );

    let health = fabric.coordinator.health().await;
    info!(
        status = %health.status,
        agents = health.total_agents,
        "Switchyard ready, press Ctrl+C to stop"
    );

    wait_for_shutdown_signal().await;
    background.cancel();
    fabric.coordinator.shutdown().await;
    info!("Switchyard stopped");
    Ok(())
}

/// Log processed lifecycle events at debug level, and failures at warn.
fn start_event_logger(coordinator: &Coordinator, cancel: CancellationToken) {
    let mut events = coordinator.subscribe_events();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Ok(event) => match &event.kind {
                        EventKind::DeliveryFailed { recipient, error, .. } => {
                            warn!(recipient = %recipient, error = %error, "Delivery failed");
                        }
                        EventKind::TaskFailed { task_id, error } => {
                            warn!(task_id = %task_id, error = %error, "Task failed");
                        }
                        _ => debug!(event = event.name(), source = %event.source, "Event"),
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event logger fell behind");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    });
}

/// Periodically reclaim expired audit records.
fn start_cleanup_task(store: &Arc<MemoryStore>, interval: Duration, cancel: CancellationToken) {
    let store = store.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let removed = store.cleanup_expired().await;
                    if removed > 0 {
                        info!(removed, "Cleanup: removed expired audit records");
                    }
                }
                _ = cancel.cancelled() => {
                    debug!("Cleanup task shutting down");
                    break;
                }
            }
        }
    });
    info!(interval_secs = interval.as_secs(), "Cleanup task started");
}

/// Wait for Ctrl+C or SIGTERM
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received SIGTERM signal"),
    }
}
