//! HTTP control plane.
//!
//! Session hooks register, heartbeat and end sessions here; the
//! `rate-governor-ctl` companion reads status and issues manual overrides.
//! Bound to loopback only.

mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::orchestrator::Governor;
use crate::{AppError, Result};

pub use handlers::{
    ErrorBody, EventsQuery, HeaderSignalRequest, HeaderSignalResponse, PauseRequest,
    ResumeResponse, UsageRequest, UsageResponse,
};

/// Build the control-plane router.
#[must_use]
pub fn router(governor: Arc<Governor>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/status", get(handlers::status))
        .route("/api/strategy", get(handlers::strategy))
        .route("/api/session/register", post(handlers::register))
        .route("/api/session/heartbeat", post(handlers::heartbeat))
        .route("/api/session/end", post(handlers::end))
        .route("/api/session/status", get(handlers::pause_status))
        .route("/api/sessions", get(handlers::sessions))
        .route("/api/events", get(handlers::events))
        .route("/api/pause", post(handlers::pause))
        .route("/api/resume", post(handlers::resume))
        .route("/api/usage", post(handlers::usage))
        .route("/api/signal/headers", post(handlers::header_signal))
        .with_state(governor)
}

/// Bind the loopback listener for `port`. Port 0 picks an ephemeral port.
///
/// # Errors
///
/// Returns `AppError::Config` if the port cannot be bound.
pub async fn bind(port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    TcpListener::bind(addr)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind control plane on {addr}: {err}")))
}

/// Serve the control plane on `listener` until `cancel` fires.
///
/// # Errors
///
/// Returns `AppError::Io` if the server fails.
pub async fn serve(
    listener: TcpListener,
    governor: Arc<Governor>,
    cancel: CancellationToken,
) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "control plane listening");

    axum::serve(listener, router(governor))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|err| AppError::Io(format!("control plane server error: {err}")))?;

    info!("control plane shut down");
    Ok(())
}
