//! Debounced relay actuator.
//!
//! A [`RelayActuator`] wraps one claimed output terminal and tracks the relay
//! state as a small state machine:
//!
//! ```text
//! Unknown ──► On ◄──► Off
//!              │       │
//!              └► Error ◄┘   (left only by the next successful write)
//! ```
//!
//! Every hardware write goes through [`DebouncedOutput`], which silently drops
//! writes that arrive inside the debounce window of the previous successful
//! write. That protects the relay contacts no matter how often callers ask.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::gpio::{Gpio, GpioError, Level, OutputPin};
use crate::rate_limit::RateLimitedLogger;

/// Relay state as last observed or written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayState {
    /// Nothing read yet.
    #[default]
    Unknown,
    /// Closed, terminal high.
    On,
    /// Open, terminal low.
    Off,
    /// The last write failed.
    Error,
}

impl RelayState {
    /// `true` for [`On`](Self::On) and [`Off`](Self::Off).
    #[must_use]
    pub const fn is_valid(self) -> bool {
        matches!(self, Self::On | Self::Off)
    }

    /// Level that represents this state on the terminal.
    #[must_use]
    pub const fn level(self) -> Level {
        match self {
            Self::On => Level::High,
            _ => Level::Low,
        }
    }

    /// State implied by a physical level.
    #[must_use]
    pub const fn from_level(level: Level) -> Self {
        match level {
            Level::High => Self::On,
            Level::Low => Self::Off,
        }
    }

    /// The other valid state, if this one is valid.
    #[must_use]
    pub const fn opposite(self) -> Option<Self> {
        match self {
            Self::On => Some(Self::Off),
            Self::Off => Some(Self::On),
            Self::Unknown | Self::Error => None,
        }
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown",
            Self::On => "on",
            Self::Off => "off",
            Self::Error => "error",
        })
    }
}

/// What a relay request actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actuation {
    /// The terminal was written.
    Written,
    /// Already in the requested state; nothing written.
    Unchanged,
    /// Inside the debounce or operate window; request dropped.
    Debounced,
}

/// Errors raised by the relay actuator.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Neither terminal could be claimed.
    #[error(
        "failed to claim primary terminal {primary_terminal}: {primary}; \
         failed to claim backup terminal {backup_terminal}: {backup}"
    )]
    ClaimFailed {
        /// Primary terminal name.
        primary_terminal: String,
        /// Why the primary claim failed.
        primary: GpioError,
        /// Backup terminal name.
        backup_terminal: String,
        /// Why the backup claim failed.
        backup: GpioError,
    },

    /// Writing the terminal failed; the relay is now in [`RelayState::Error`].
    #[error("failed to turn {target} relay: {source}")]
    WriteFailed {
        /// State that was being written.
        target: RelayState,
        /// Driver failure.
        #[source]
        source: GpioError,
    },

    /// Toggle requested while the state is not `On` or `Off`.
    #[error("unable to toggle relay in invalid state: {0}")]
    InvalidState(RelayState),
}

/// Timing knobs for an actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayTiming {
    /// Minimum time between two successful writes.
    pub debounce: Duration,
    /// Minimum time between two momentary presses.
    pub min_operate_interval: Duration,
}

impl From<&RelayConfig> for RelayTiming {
    fn from(config: &RelayConfig) -> Self {
        Self {
            debounce: config.debounce(),
            min_operate_interval: config.min_operate_interval(),
        }
    }
}

/// An output pin that refuses writes inside its debounce window.
#[derive(Debug)]
pub struct DebouncedOutput<P> {
    pin: P,
    debounce: Duration,
    last_write: Option<Instant>,
    memo: Arc<RateLimitedLogger>,
}

impl<P: OutputPin> DebouncedOutput<P> {
    /// Wrap `pin` with a debounce window.
    pub fn new(pin: P, debounce: Duration, memo: Arc<RateLimitedLogger>) -> Self {
        Self {
            pin,
            debounce,
            last_write: None,
            memo,
        }
    }

    /// Terminal name.
    pub fn name(&self) -> &str {
        self.pin.name()
    }

    /// Read the physical level.
    ///
    /// # Errors
    ///
    /// Propagates the driver's read error.
    pub fn read(&self) -> Result<Level, GpioError> {
        self.pin.read()
    }

    /// Write `level` unless the previous successful write is too recent.
    ///
    /// # Errors
    ///
    /// Propagates the driver's write error. A debounced write is not an error.
    pub fn send(&mut self, level: Level) -> Result<Actuation, GpioError> {
        let now = Instant::now();
        if let Some(last) = self.last_write {
            if now < last + self.debounce {
                self.memo
                    .debug(format_args!("{}: debounced write {level}", self.pin.name()));
                return Ok(Actuation::Debounced);
            }
        }
        self.force(level)
    }

    /// Write `level` regardless of the debounce window.
    ///
    /// # Errors
    ///
    /// Propagates the driver's write error.
    pub fn force(&mut self, level: Level) -> Result<Actuation, GpioError> {
        self.pin.write(level)?;
        self.last_write = Some(Instant::now());
        Ok(Actuation::Written)
    }
}

/// One bistable relay behind a debounced digital output.
///
/// The actuator is owned by a single caller (the event loop), so hardware
/// writes are serialized without any locking.
#[derive(Debug)]
pub struct RelayActuator<P> {
    output: DebouncedOutput<P>,
    state: RelayState,
    min_operate_interval: Duration,
    last_operate: Option<Instant>,
    memo: Arc<RateLimitedLogger>,
}

impl<P: OutputPin> RelayActuator<P> {
    /// Claim the primary terminal, falling back to the backup.
    ///
    /// The initial state is read from the terminal rather than assumed.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ClaimFailed`] naming both failures if neither
    /// terminal can be claimed.
    pub fn claim<G>(
        gpio: &G,
        primary: &str,
        backup: &str,
        timing: RelayTiming,
        memo: Arc<RateLimitedLogger>,
    ) -> Result<Self, RelayError>
    where
        G: Gpio<Pin = P>,
    {
        let pin = match gpio.claim(primary) {
            Ok(pin) => pin,
            Err(primary_err) => {
                warn!(terminal = primary, error = %primary_err, "Primary terminal unavailable, trying backup");
                gpio.claim(backup)
                    .map_err(|backup_err| RelayError::ClaimFailed {
                        primary_terminal: primary.to_string(),
                        primary: primary_err,
                        backup_terminal: backup.to_string(),
                        backup: backup_err,
                    })?
            }
        };

        let output = DebouncedOutput::new(pin, timing.debounce, Arc::clone(&memo));
        let state = match output.read() {
            Ok(level) => RelayState::from_level(level),
            Err(e) => {
                warn!(terminal = output.name(), error = %e, "Could not read initial relay level");
                RelayState::Unknown
            }
        };
        info!(terminal = output.name(), %state, "Relay claimed");

        Ok(Self {
            output,
            state,
            min_operate_interval: timing.min_operate_interval,
            last_operate: None,
            memo,
        })
    }

    /// Claim using the `[relay]` configuration section.
    ///
    /// # Errors
    ///
    /// See [`claim`](Self::claim).
    pub fn from_config<G>(
        gpio: &G,
        config: &RelayConfig,
        memo: Arc<RateLimitedLogger>,
    ) -> Result<Self, RelayError>
    where
        G: Gpio<Pin = P>,
    {
        Self::claim(
            gpio,
            &config.primary_terminal,
            &config.backup_terminal,
            RelayTiming::from(config),
            memo,
        )
    }

    /// Current state.
    pub const fn state(&self) -> RelayState {
        self.state
    }

    /// Name of the terminal actually claimed.
    pub fn terminal(&self) -> &str {
        self.output.name()
    }

    /// Close the relay after `settle`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::WriteFailed`] if the write fails.
    pub async fn on(&mut self, settle: Duration) -> Result<Actuation, RelayError> {
        debug!(relay = %self, "on");
        self.switch(RelayState::On, settle).await
    }

    /// Open the relay after `settle`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::WriteFailed`] if the write fails.
    pub async fn off(&mut self, settle: Duration) -> Result<Actuation, RelayError> {
        debug!(relay = %self, "off");
        self.switch(RelayState::Off, settle).await
    }

    /// Flip the relay after `settle`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidState`] without touching the hardware if
    /// the state is `Unknown` or `Error`, or [`RelayError::WriteFailed`].
    pub async fn toggle(&mut self, settle: Duration) -> Result<Actuation, RelayError> {
        debug!(relay = %self, "toggle");
        let target = self
            .state
            .opposite()
            .ok_or(RelayError::InvalidState(self.state))?;
        tokio::time::sleep(settle).await;
        self.write(target)
    }

    /// Momentary press: high, hold for `press`, low.
    ///
    /// Gated as a unit by the minimum operate interval instead of the per-write
    /// debounce.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::WriteFailed`] if either edge fails.
    pub async fn operate(&mut self, press: Duration) -> Result<Actuation, RelayError> {
        debug!(relay = %self, "operate");
        let started = Instant::now();
        if let Some(last) = self.last_operate {
            if started < last + self.min_operate_interval {
                self.memo
                    .debug(format_args!("{}: debounced operate", self.output.name()));
                return Ok(Actuation::Debounced);
            }
        }

        self.force(RelayState::On)?;
        tokio::time::sleep(press).await;
        self.force(RelayState::Off)?;
        self.last_operate = Some(started);
        Ok(Actuation::Written)
    }

    async fn switch(
        &mut self,
        target: RelayState,
        settle: Duration,
    ) -> Result<Actuation, RelayError> {
        if self.state == target {
            return Ok(Actuation::Unchanged);
        }
        tokio::time::sleep(settle).await;
        self.write(target)
    }

    fn write(&mut self, target: RelayState) -> Result<Actuation, RelayError> {
        let result = self.output.send(target.level());
        self.apply(target, result)
    }

    fn force(&mut self, target: RelayState) -> Result<Actuation, RelayError> {
        let result = self.output.force(target.level());
        self.apply(target, result)
    }

    fn apply(
        &mut self,
        target: RelayState,
        result: Result<Actuation, GpioError>,
    ) -> Result<Actuation, RelayError> {
        match result {
            Ok(Actuation::Written) => {
                self.state = target;
                Ok(Actuation::Written)
            }
            Ok(other) => Ok(other),
            Err(source) => {
                self.state = RelayState::Error;
                Err(RelayError::WriteFailed { target, source })
            }
        }
    }
}

impl<P: OutputPin> fmt::Display for RelayActuator<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Relay {{state: {}, terminal: {}}}",
            self.state,
            self.output.name()
        )
    }
}
