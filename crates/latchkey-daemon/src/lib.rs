//! # latchkey-daemon
//!
//! Process-level wiring for latchkey: logging, hardware selection, the event
//! loop and the optional read-only status endpoint.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod app;
pub mod logging;
pub mod state;
