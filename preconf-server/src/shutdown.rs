//! Signal handling for graceful shutdown.

use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;

/// Creates a future that completes when a shutdown signal is received.
///
/// Listens for SIGTERM and SIGINT (Ctrl+C).
pub async fn shutdown_signal() -> std::io::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT, initiating graceful shutdown");
        }
    }
    Ok(())
}

/// Spawns a task that turns the first shutdown signal into `true` on `shutdown_tx`.
///
/// If the signal handlers cannot be installed the process shuts down right
/// away rather than running without a way to stop it cleanly.
pub fn spawn_signal_handler(shutdown_tx: Arc<watch::Sender<bool>>) {
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            tracing::error!("Failed to install signal handlers: {}", e);
        }
        shutdown_tx.send_replace(true);
    });
}
