//! State shared with the status handlers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use latchkey_core::RelayState;
use tokio::sync::watch;

/// Read-only view of the running daemon.
#[derive(Debug)]
pub struct AppState {
    relay: watch::Receiver<RelayState>,
    started_at: Instant,
    known_actors: usize,
}

/// Shared application state type used by axum handlers.
pub type SharedState = Arc<AppState>;

impl AppState {
    /// Create state observing the event loop's relay channel.
    #[must_use]
    pub fn new(relay: watch::Receiver<RelayState>, known_actors: usize) -> Self {
        Self {
            relay,
            started_at: Instant::now(),
            known_actors,
        }
    }

    /// Relay state as of the last sampling tick.
    #[must_use]
    pub fn relay_state(&self) -> RelayState {
        *self.relay.borrow()
    }

    /// Time since the state was created.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Number of allow-listed actors.
    #[must_use]
    pub const fn known_actors(&self) -> usize {
        self.known_actors
    }
}
