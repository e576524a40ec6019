//! Sampling event loop.
//!
//! The loop wakes once per sampling interval, drains whatever the radar has
//! queued, and acts only on the most recent event. Bursty RF flapping
//! (enter/exit/enter inside one tick) collapses into a single actuation, and
//! the relay is never driven faster than the sampling cadence.

use std::time::Duration;

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::config::{Config, RelayMode};
use crate::error::{LatchkeyError, Result};
use crate::gpio::OutputPin;
use crate::radar::EventStream;
use crate::relay::{Actuation, RelayActuator, RelayError, RelayState};
use crate::types::{Action, Event};

/// Timing and mode for the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    /// Time between two drains.
    pub sample_interval: Duration,
    /// Settle delay passed to every relay call.
    pub settle_delay: Duration,
    /// Latching or momentary relay.
    pub mode: RelayMode,
}

impl From<&Config> for LoopSettings {
    fn from(config: &Config) -> Self {
        Self {
            sample_interval: config.event_loop.sample_interval(),
            settle_delay: config.relay.settle_delay(),
            mode: config.relay.mode,
        }
    }
}

/// What one sampling tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    /// Nothing was queued.
    Idle,
    /// The last queued event was acted on.
    Acted {
        /// The event that won.
        event: Event,
        /// How many events were drained in total.
        drained: usize,
    },
    /// The radar closed the stream. Any final batch was still acted on.
    Closed,
}

/// Drains the radar's queue on a fixed cadence and drives the relay.
///
/// The loop is the only owner of the [`RelayActuator`].
pub struct EventLoop<P> {
    events: EventStream,
    relay: RelayActuator<P>,
    settings: LoopSettings,
    observer: Option<watch::Sender<RelayState>>,
}

impl<P: OutputPin> EventLoop<P> {
    /// Create a loop over `events` driving `relay`.
    pub const fn new(events: EventStream, relay: RelayActuator<P>, settings: LoopSettings) -> Self {
        Self {
            events,
            relay,
            settings,
            observer: None,
        }
    }

    /// Publish the relay state after every tick.
    #[must_use]
    pub fn with_observer(mut self, observer: watch::Sender<RelayState>) -> Self {
        observer.send_replace(self.relay.state());
        self.observer = Some(observer);
        self
    }

    /// The relay being driven.
    pub const fn relay(&self) -> &RelayActuator<P> {
        &self.relay
    }

    /// Run until the radar closes the stream.
    ///
    /// # Errors
    ///
    /// Always ends with [`LatchkeyError::EventStreamClosed`]; the process is
    /// expected to exit and be restarted by its supervisor.
    pub async fn run(mut self) -> Result<()> {
        info!(
            interval_ms = self.settings.sample_interval.as_millis(),
            mode = ?self.settings.mode,
            relay = %self.relay,
            "Event loop started"
        );
        loop {
            if self.tick().await == Tick::Closed {
                error!("Event stream closed, stopping event loop");
                return Err(LatchkeyError::EventStreamClosed);
            }
        }
    }

    /// Sleep one interval, drain the queue, act on the last event.
    pub async fn tick(&mut self) -> Tick {
        tokio::time::sleep(self.settings.sample_interval).await;

        let mut last = None;
        let mut drained = 0;
        let closed = loop {
            match self.events.try_recv() {
                Ok(event) => {
                    drained += 1;
                    last = Some(event);
                }
                Err(TryRecvError::Empty) => break false,
                Err(TryRecvError::Disconnected) => break true,
            }
        };

        let tick = match last {
            Some(event) => {
                if drained > 1 {
                    debug!(drained, kept = %event, "Coalesced event burst");
                }
                self.act(&event).await;
                Tick::Acted { event, drained }
            }
            None => Tick::Idle,
        };
        self.publish();

        if closed {
            Tick::Closed
        } else {
            tick
        }
    }

    async fn act(&mut self, event: &Event) {
        let settle = self.settings.settle_delay;
        let result: std::result::Result<Actuation, RelayError> =
            match (self.settings.mode, event.action) {
                (RelayMode::Latching, Action::Entering) => self.relay.on(settle).await,
                (RelayMode::Latching, Action::Exiting) => self.relay.off(settle).await,
                (RelayMode::Momentary, Action::Entering) => self.relay.operate(settle).await,
                (RelayMode::Momentary, Action::Exiting) => Ok(Actuation::Unchanged),
            };

        match result {
            Ok(Actuation::Written) => {
                info!(actor = %event.actor, action = %event.action, state = %self.relay.state(), "Relay actuated");
            }
            Ok(outcome) => {
                debug!(actor = %event.actor, action = %event.action, ?outcome, "Relay left as is");
            }
            Err(e) => {
                error!(actor = %event.actor, action = %event.action, error = %e, "Relay actuation failed");
            }
        }
    }

    fn publish(&self) {
        if let Some(observer) = &self.observer {
            observer.send_replace(self.relay.state());
        }
    }
}
