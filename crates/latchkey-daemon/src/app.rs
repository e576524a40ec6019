//! Wiring: radar, relay, event loop and the optional status endpoint.

use std::sync::Arc;

use latchkey_core::{
    ActorRegistry, Config, EventLoop, Gpio, LatchkeyError, LoopSettings, ProximityRadar, Radio,
    RadarSettings, RateLimitedLogger, RelayActuator, Result,
};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::api;
use crate::state::AppState;

/// Build the hardware for this build and run until a fatal error.
///
/// # Errors
///
/// Returns the fatal error that stopped the daemon.
pub async fn run(config: &Config) -> Result<()> {
    let (radio, gpio) = hardware::open().await?;
    serve(config, radio, &gpio).await
}

/// Run the daemon on the given radio and GPIO driver.
///
/// The relay is claimed before the radar starts, so a missing terminal fails
/// startup without ever advertising.
///
/// # Errors
///
/// Returns a startup error, or [`LatchkeyError::EventStreamClosed`] once the
/// radar stops.
pub async fn serve<R, G>(config: &Config, radio: Arc<R>, gpio: &G) -> Result<()>
where
    R: Radio,
    G: Gpio,
{
    let memo = Arc::new(RateLimitedLogger::new(config.logging.suppression_window()));
    let registry = Arc::new(ActorRegistry::from_config(&config.actors));
    if registry.is_empty() {
        warn!("No known actors configured; every connection will be rejected");
    }

    let relay = RelayActuator::from_config(gpio, &config.relay, Arc::clone(&memo))?;
    let (state_tx, state_rx) = watch::channel(relay.state());

    let radar = ProximityRadar::new(
        radio,
        Arc::clone(&registry),
        RadarSettings::from(&config.bluetooth),
        memo,
    );
    let events = radar.search().await?;

    if config.status.enabled {
        let addr = config.status_addr()?;
        api::spawn(addr, Arc::new(AppState::new(state_rx, registry.len()))).await?;
    }

    info!(relay = %relay, "latchkeyd running");
    EventLoop::new(events, relay, LoopSettings::from(config))
        .with_observer(state_tx)
        .run()
        .await
}

/// Log a fatal error with its code.
pub fn report(err: &LatchkeyError) {
    tracing::error!(code = err.error_code(), fatal = err.is_fatal(), error = %err, "latchkeyd stopped");
}

#[cfg(feature = "mock-hardware")]
mod hardware {
    use std::sync::Arc;

    use latchkey_core::{MockGpio, MockRadio, Result};
    use tracing::warn;

    #[allow(clippy::unused_async)]
    pub async fn open() -> Result<(Arc<MockRadio>, MockGpio)> {
        warn!("Running with in-memory radio and GPIO");
        Ok((Arc::new(MockRadio::new()), MockGpio::new()))
    }
}

#[cfg(all(feature = "bluetooth", not(feature = "mock-hardware")))]
mod hardware {
    use std::sync::Arc;

    use latchkey_core::gpio::sysfs_available;
    use latchkey_core::{BluerRadio, Result, SysfsGpio};
    use tracing::warn;

    pub async fn open() -> Result<(Arc<BluerRadio>, SysfsGpio)> {
        let gpio = SysfsGpio::default();
        if !sysfs_available(gpio.root()) {
            warn!(root = %gpio.root().display(), "GPIO sysfs not found; relay claim will fail");
        }
        Ok((Arc::new(BluerRadio::new().await?), gpio))
    }
}

#[cfg(not(any(feature = "bluetooth", feature = "mock-hardware")))]
compile_error!("latchkeyd needs the `bluetooth` or `mock-hardware` feature");

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use latchkey_core::{Level, MockGpio, MockRadio};

    use super::*;

    const KNOWN: &str = "AA:BB:CC:DD:EE:FF";

    fn config() -> Config {
        Config::from_toml_str(
            r#"
            [actors]
            known = ["AA:BB:CC:DD:EE:FF"]
            "#,
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_serve_drives_relay_from_connections() {
        let radio = MockRadio::new();
        let gpio = MockGpio::new();
        let config = config();

        let daemon = {
            let radio = Arc::new(radio.clone());
            let gpio = gpio.clone();
            tokio::spawn(async move { serve(&config, radio, &gpio).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(radio.is_advertising());

        assert!(radio.signal(KNOWN, true));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(gpio.writes("GPIO17"), vec![Level::High]);

        daemon.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_terminals_fail_before_advertising() {
        let radio = MockRadio::new();
        let gpio = MockGpio::new()
            .without_terminal("GPIO17")
            .without_terminal("GPIO27");

        let err = tokio_test::assert_err!(serve(&config(), Arc::new(radio.clone()), &gpio).await);
        assert!(matches!(err, LatchkeyError::TerminalClaimFailed(_)));
        assert!(err.is_fatal());
        assert_eq!(radio.advertise_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_radar_failure_is_fatal() {
        let radio = MockRadio::new().failing_advertise_after(1);
        let err = tokio_test::assert_err!(serve(&config(), Arc::new(radio), &MockGpio::new()).await);
        assert!(matches!(err, LatchkeyError::EventStreamClosed));
        assert_eq!(err.error_code(), "EVENT_STREAM_CLOSED");
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_connection_monitor_is_fatal() {
        let radio = MockRadio::new();
        let daemon = {
            let radio = Arc::new(radio.clone());
            tokio::spawn(async move { serve(&config(), radio, &MockGpio::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(radio.fail_monitor());

        let err = tokio_test::assert_err!(daemon.await.unwrap());
        assert!(matches!(err, LatchkeyError::EventStreamClosed));
        assert!(!radio.is_advertising());
    }

    #[tokio::test(start_paused = true)]
    async fn test_adapter_failure_is_fatal() {
        let radio = MockRadio::new().failing_enable();
        let err = tokio_test::assert_err!(serve(&config(), Arc::new(radio), &MockGpio::new()).await);
        assert!(matches!(err, LatchkeyError::BluetoothEnableFailed(_)));
        assert!(err.is_fatal());
    }
}
