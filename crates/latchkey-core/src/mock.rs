//! In-memory radio and GPIO doubles.
//!
//! Available in tests and behind the `mock-hardware` feature, which lets the
//! daemon run end to end on a machine without Bluetooth or GPIO hardware.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::gpio::{Gpio, GpioError, Level, OutputPin};
use crate::radio::{ConnectHandler, MonitorFailure, Radio, RadioError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// GPIO
// ============================================================================

#[derive(Debug, Default)]
struct GpioInner {
    missing: HashSet<String>,
    unreadable: HashSet<String>,
    failing: HashSet<String>,
    levels: HashMap<String, Level>,
    writes: HashMap<String, Vec<Level>>,
    claims: Vec<String>,
}

/// A GPIO driver whose terminals live in memory.
///
/// Every terminal exists and reads low unless configured otherwise.
#[derive(Debug, Clone, Default)]
pub struct MockGpio {
    inner: Arc<Mutex<GpioInner>>,
}

impl MockGpio {
    /// All terminals present, low, writable.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `terminal` fail to claim.
    #[must_use]
    pub fn without_terminal(self, terminal: &str) -> Self {
        lock(&self.inner).missing.insert(terminal.to_string());
        self
    }

    /// Set the initial level of `terminal`.
    #[must_use]
    pub fn with_level(self, terminal: &str, level: Level) -> Self {
        lock(&self.inner).levels.insert(terminal.to_string(), level);
        self
    }

    /// Make reads of `terminal` fail.
    #[must_use]
    pub fn with_unreadable(self, terminal: &str) -> Self {
        lock(&self.inner).unreadable.insert(terminal.to_string());
        self
    }

    /// Toggle write failures on `terminal`.
    pub fn fail_writes(&self, terminal: &str, fail: bool) {
        let mut inner = lock(&self.inner);
        if fail {
            inner.failing.insert(terminal.to_string());
        } else {
            inner.failing.remove(terminal);
        }
    }

    /// Successful writes to `terminal`, oldest first.
    #[must_use]
    pub fn writes(&self, terminal: &str) -> Vec<Level> {
        lock(&self.inner)
            .writes
            .get(terminal)
            .cloned()
            .unwrap_or_default()
    }

    /// Terminals claimed so far, including failed attempts.
    #[must_use]
    pub fn claims(&self) -> Vec<String> {
        lock(&self.inner).claims.clone()
    }

    /// Current level of `terminal`.
    #[must_use]
    pub fn level(&self, terminal: &str) -> Level {
        lock(&self.inner)
            .levels
            .get(terminal)
            .copied()
            .unwrap_or(Level::Low)
    }
}

impl Gpio for MockGpio {
    type Pin = MockPin;

    fn claim(&self, terminal: &str) -> Result<MockPin, GpioError> {
        let mut inner = lock(&self.inner);
        inner.claims.push(terminal.to_string());
        if inner.missing.contains(terminal) {
            return Err(GpioError::NotPresent {
                terminal: terminal.to_string(),
            });
        }
        Ok(MockPin {
            name: terminal.to_string(),
            inner: Arc::clone(&self.inner),
        })
    }
}

/// A terminal handed out by [`MockGpio`].
#[derive(Debug)]
pub struct MockPin {
    name: String,
    inner: Arc<Mutex<GpioInner>>,
}

impl OutputPin for MockPin {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self) -> Result<Level, GpioError> {
        let inner = lock(&self.inner);
        if inner.unreadable.contains(&self.name) {
            return Err(GpioError::InvalidLevel {
                terminal: self.name.clone(),
                value: "?".to_string(),
            });
        }
        Ok(inner.levels.get(&self.name).copied().unwrap_or(Level::Low))
    }

    fn write(&mut self, level: Level) -> Result<(), GpioError> {
        let mut inner = lock(&self.inner);
        if inner.failing.contains(&self.name) {
            return Err(GpioError::Io {
                terminal: self.name.clone(),
                source: std::io::Error::other("injected write failure"),
            });
        }
        inner.levels.insert(self.name.clone(), level);
        inner.writes.entry(self.name.clone()).or_default().push(level);
        Ok(())
    }
}

// ============================================================================
// Radio
// ============================================================================

#[derive(Default)]
struct RadioInner {
    enabled: bool,
    fail_enable: bool,
    advertising: bool,
    advertise_calls: usize,
    fail_advertise_after: Option<usize>,
    handler: Option<ConnectHandler>,
    monitor: Option<oneshot::Sender<RadioError>>,
    connected: HashSet<String>,
    disconnects: Vec<String>,
    writes: Vec<(String, Uuid, Vec<u8>)>,
}

/// A radio adapter driven by the test instead of the air.
///
/// [`signal`](Self::signal) plays the role of the BLE stack reporting a
/// connection change; `disconnect` calls made by the radar are recorded.
#[derive(Clone, Default)]
pub struct MockRadio {
    inner: Arc<Mutex<RadioInner>>,
}

impl std::fmt::Debug for MockRadio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("MockRadio")
            .field("enabled", &inner.enabled)
            .field("advertising", &inner.advertising)
            .field("has_handler", &inner.handler.is_some())
            .finish_non_exhaustive()
    }
}

impl MockRadio {
    /// A radio that accepts every call.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `enable` fail.
    #[must_use]
    pub fn failing_enable(self) -> Self {
        lock(&self.inner).fail_enable = true;
        self
    }

    /// Let `calls` advertisements succeed, then fail every one after.
    #[must_use]
    pub fn failing_advertise_after(self, calls: usize) -> Self {
        lock(&self.inner).fail_advertise_after = Some(calls);
        self
    }

    /// Report a connection change for `identifier` through the registered
    /// handler. Returns `false` if no handler is registered yet.
    pub fn signal(&self, identifier: &str, connected: bool) -> bool {
        let handler = {
            let mut inner = lock(&self.inner);
            if connected {
                inner.connected.insert(identifier.to_string());
            } else {
                inner.connected.remove(identifier);
            }
            inner.handler.clone()
        };
        handler.map_or(false, |handler| {
            handler(identifier.to_string(), connected);
            true
        })
    }

    /// Kill the connection monitor: the handler is dropped and the failure is
    /// reported to whoever registered it. Returns `false` if no handler is
    /// registered.
    pub fn fail_monitor(&self) -> bool {
        let monitor = {
            let mut inner = lock(&self.inner);
            inner.handler = None;
            inner.monitor.take()
        };
        monitor.map_or(false, |monitor| {
            let _ = monitor.send(RadioError::MonitorFailed {
                message: "injected monitor failure".to_string(),
            });
            true
        })
    }

    /// Whether `enable` has succeeded.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        lock(&self.inner).enabled
    }

    /// Whether an advertisement is currently running.
    #[must_use]
    pub fn is_advertising(&self) -> bool {
        lock(&self.inner).advertising
    }

    /// Number of `advertise` calls so far.
    #[must_use]
    pub fn advertise_calls(&self) -> usize {
        lock(&self.inner).advertise_calls
    }

    /// Identifiers the radar asked to disconnect, oldest first.
    #[must_use]
    pub fn disconnects(&self) -> Vec<String> {
        lock(&self.inner).disconnects.clone()
    }

    /// Characteristic writes, oldest first.
    #[must_use]
    pub fn writes(&self) -> Vec<(String, Uuid, Vec<u8>)> {
        lock(&self.inner).writes.clone()
    }
}

#[async_trait]
impl Radio for MockRadio {
    async fn enable(&self) -> Result<(), RadioError> {
        let mut inner = lock(&self.inner);
        if inner.fail_enable {
            return Err(RadioError::EnableFailed {
                message: "injected enable failure".to_string(),
            });
        }
        inner.enabled = true;
        Ok(())
    }

    async fn advertise(
        &self,
        _name: &str,
        _service: Uuid,
        _window: Duration,
    ) -> Result<(), RadioError> {
        let mut inner = lock(&self.inner);
        if inner
            .fail_advertise_after
            .is_some_and(|limit| inner.advertise_calls >= limit)
        {
            return Err(RadioError::AdvertiseFailed {
                message: "injected advertise failure".to_string(),
            });
        }
        inner.advertise_calls += 1;
        inner.advertising = true;
        Ok(())
    }

    async fn stop_advertise(&self) -> Result<(), RadioError> {
        lock(&self.inner).advertising = false;
        Ok(())
    }

    fn set_connect_handler(&self, handler: ConnectHandler) -> MonitorFailure {
        let (tx, rx) = oneshot::channel();
        let mut inner = lock(&self.inner);
        inner.handler = Some(handler);
        inner.monitor = Some(tx);
        rx
    }

    async fn disconnect(&self, identifier: &str) -> Result<(), RadioError> {
        let mut inner = lock(&self.inner);
        inner.connected.remove(identifier);
        inner.disconnects.push(identifier.to_string());
        Ok(())
    }

    async fn write_characteristic(
        &self,
        identifier: &str,
        characteristic: Uuid,
        bytes: &[u8],
    ) -> Result<(), RadioError> {
        let mut inner = lock(&self.inner);
        if !inner.connected.contains(identifier) {
            return Err(RadioError::WriteFailed {
                address: identifier.to_string(),
                message: "not connected".to_string(),
            });
        }
        inner
            .writes
            .push((identifier.to_string(), characteristic, bytes.to_vec()));
        Ok(())
    }
}
