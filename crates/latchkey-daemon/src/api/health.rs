//! Health check endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use latchkey_core::RelayState;
use serde::{Deserialize, Serialize};

use crate::state::SharedState;

/// Health check response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,

    /// Service version from Cargo.toml.
    pub version: String,

    /// Relay state as of the last sampling tick.
    pub relay_state: RelayState,

    /// Seconds since startup.
    pub uptime_secs: u64,

    /// Number of allow-listed actors.
    pub known_actors: usize,
}

/// Creates the health router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(health_check))
}

/// `GET /health`
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        relay_state: state.relay_state(),
        uptime_secs: state.uptime().as_secs(),
        known_actors: state.known_actors(),
    })
}
