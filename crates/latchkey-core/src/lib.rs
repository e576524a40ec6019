//! # latchkey-core
//!
//! Core logic for latchkey: a Raspberry Pi advertises itself over BLE, treats
//! connections from allow-listed phones as presence events, and drives a relay
//! (a door strike, a garage opener) from those events.
//!
//! ## Architecture
//!
//! - [`radar`] - advertises, filters connection signals, queues presence events
//! - [`event_loop`] - samples the queue on a fixed cadence and drives the relay
//! - [`relay`] - debounced bistable relay on a GPIO terminal
//! - [`radio`] / [`bluetooth`] - radio capability and its BlueZ implementation
//! - [`gpio`] - GPIO capability and its sysfs implementation
//! - [`rate_limit`] - log de-duplication for noisy radio chatter
//! - [`registry`] - the actor allow-list
//! - [`config`] - TOML configuration loading and validation
//! - [`error`] - unified error type for the crate
//! - [`types`] - actors, events and payloads

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

#[cfg(feature = "bluetooth")]
pub mod bluetooth;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod gpio;
#[cfg(any(test, feature = "mock-hardware"))]
pub mod mock;
pub mod radar;
pub mod radio;
pub mod rate_limit;
pub mod registry;
pub mod relay;
pub mod types;

// Re-export primary types for convenience
#[cfg(feature = "bluetooth")]
pub use bluetooth::BluerRadio;
pub use config::{
    is_valid_mac_address, ActorsConfig, BluetoothConfig, Config, ConfigError, ConfigResult,
    EventLoopConfig, LoggingConfig, RelayConfig, RelayMode, StatusConfig,
};
pub use error::{LatchkeyError, Result};
pub use event_loop::{EventLoop, LoopSettings, Tick};
pub use gpio::{Gpio, GpioError, Level, OutputPin, SysfsGpio, SysfsPin};
#[cfg(any(test, feature = "mock-hardware"))]
pub use mock::{MockGpio, MockPin, MockRadio};
pub use radar::{Admission, EventStream, ProximityRadar, RadarError, RadarSettings};
pub use radio::{ConnectHandler, Radio, RadioError};
pub use rate_limit::RateLimitedLogger;
pub use registry::ActorRegistry;
pub use relay::{Actuation, RelayActuator, RelayError, RelayState, RelayTiming};
pub use types::{Action, Actor, Event, Payload};
