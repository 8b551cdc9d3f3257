//! Axum server setup and router configuration.

use crate::state::AppState;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, http::StatusCode, routing::get};
use preconf_core::utils::shutdown::wait_for_shutdown;
use serde::Serialize;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Build the main application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health check endpoint
        .route("/health", get(health_check))
        // Add state to all routes
        .with_state(state)
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    /// Settlement transactions sent but not yet finalized.
    pending_txn_count: u64,
    /// Nonces below this are finalized on the settlement chain.
    confirmed_nonce: u64,
    /// Allocated nonces still waiting to be sent.
    unsent_txn_count: usize,
}

#[derive(Serialize)]
struct UnhealthyResponse {
    status: &'static str,
    version: &'static str,
    error: String,
}

/// Returns OK with the transactor's progress if the database is reachable.
async fn health_check(State(state): State<AppState>) -> Response {
    match state.store.pending_txn_count().await {
        Ok(pending_txn_count) => Json(HealthResponse {
            status: "healthy",
            version: env!("CARGO_PKG_VERSION"),
            pending_txn_count,
            confirmed_nonce: state.transactor.confirmed_nonce(),
            unsent_txn_count: state.transactor.unsent_count(),
        })
        .into_response(),
        Err(e) => {
            tracing::warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(UnhealthyResponse {
                    status: "unhealthy",
                    version: env!("CARGO_PKG_VERSION"),
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// Run the server until `shutdown_rx` turns true.
pub async fn run_server(
    router: Router,
    addr: SocketAddr,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { wait_for_shutdown(&mut shutdown_rx).await })
        .await
}
