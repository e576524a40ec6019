//! # latchkeyd
//!
//! BLE proximity daemon: advertises, admits allow-listed phones and drives a
//! relay from their comings and goings.
//!
//! ## Running
//!
//! ```bash
//! # Development, without Bluetooth or GPIO hardware
//! LATCHKEY_CONFIG=./config.toml cargo run --package latchkey-daemon --features mock-hardware
//!
//! # Production (on Raspberry Pi)
//! LATCHKEY_ENV=production ./latchkeyd
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use anyhow::Context;
use latchkey_core::Config;
use latchkey_daemon::{app, logging};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = Config::resolve_path();
    let config = Config::load(&path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;

    logging::init(&config.logging, logging::is_production())?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %path.display(),
        known_actors = config.actors.known.len(),
        "Starting latchkeyd"
    );

    if let Err(err) = app::run(&config).await {
        app::report(&err);
        return Err(err.into());
    }
    Ok(())
}
