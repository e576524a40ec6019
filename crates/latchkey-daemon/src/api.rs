//! Read-only HTTP status endpoint.
//!
//! ```text
//! /health    - liveness, version, relay state, uptime
//! ```

use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::state::SharedState;

pub mod health;

/// Creates the status router.
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Bind `addr` and serve the status router in the background.
///
/// # Errors
///
/// Returns the bind error; failures after binding are logged.
pub async fn spawn(addr: SocketAddr, state: SharedState) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Status endpoint listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, create_router(state)).await {
            error!(error = %e, "Status endpoint stopped");
        }
    });
    Ok(())
}
