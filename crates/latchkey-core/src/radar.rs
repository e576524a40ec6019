//! BLE proximity radar.
//!
//! The radar keeps the adapter discoverable and turns raw connect/disconnect
//! callbacks into a bounded stream of presence [`Event`]s for known actors.
//!
//! ## Data flow
//!
//! ```text
//! radio callback ──► ConnectionFilter ──try_send──► bounded queue ──► EventLoop
//!                          │
//!                          └──send──► disconnect worker ──sleep──► Radio::disconnect
//! ```
//!
//! The callback runs on the radio's context and only ever does non-blocking
//! channel sends. It holds a weak handle to the queue; the advertise task owns
//! the only strong sender, so an advertisement failure ends the stream even
//! though the radio keeps the callback alive.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::BluetoothConfig;
use crate::radio::{MonitorFailure, Radio, RadioError};
use crate::rate_limit::RateLimitedLogger;
use crate::registry::ActorRegistry;
use crate::types::{Action, Actor, Event, Payload};

/// Receiving end of the presence queue. `None` from `recv` means the radar
/// has died.
pub type EventStream = mpsc::Receiver<Event>;

/// Errors raised by the radar.
#[derive(Debug, Error)]
pub enum RadarError {
    /// The radio adapter failed.
    #[error(transparent)]
    Radio(#[from] RadioError),

    /// Out-of-band messages are only sent to known actors.
    #[error("refusing to message unknown actor {0}")]
    UnknownRecipient(String),
}

/// Radar settings derived from the `[bluetooth]` configuration section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadarSettings {
    /// Advertised local name.
    pub advertisement_name: String,
    /// Length of one advertise cycle.
    pub advertisement_window: Duration,
    /// Advertised service.
    pub service_uuid: Uuid,
    /// Characteristic used by [`ProximityRadar::message`].
    pub indicate_characteristic_uuid: Uuid,
    /// Event queue capacity.
    pub pool_size: usize,
    /// Grace delay before an unknown actor is disconnected.
    pub unknown_disconnect_delay: Duration,
    /// Delay before a connection is kicked because the queue is full.
    pub flood_reject_delay: Duration,
}

impl From<&BluetoothConfig> for RadarSettings {
    fn from(config: &BluetoothConfig) -> Self {
        Self {
            advertisement_name: config.advertisement_name.clone(),
            advertisement_window: config.advertisement_window(),
            service_uuid: config.service_uuid,
            indicate_characteristic_uuid: config.indicate_characteristic_uuid,
            pool_size: config.connection_pool_size,
            unknown_disconnect_delay: config.unknown_disconnect_delay(),
            flood_reject_delay: config.flood_reject_delay(),
        }
    }
}

/// How the filter classified one connection signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A presence event was queued.
    Admitted(Action),
    /// The queue was full; the device is being kicked.
    Flooded,
    /// The device is not on the allow-list.
    Unknown,
    /// The radar is no longer running.
    Closed,
}

#[derive(Debug)]
struct DisconnectRequest {
    identifier: String,
    after: Duration,
}

/// Classifies connection signals and feeds the event queue.
///
/// Every path through [`on_signal`](Self::on_signal) is non-blocking.
pub struct ConnectionFilter {
    events: mpsc::WeakSender<Event>,
    disconnects: mpsc::UnboundedSender<DisconnectRequest>,
    registry: Arc<ActorRegistry>,
    unknown_disconnect_delay: Duration,
    flood_reject_delay: Duration,
    memo: Arc<RateLimitedLogger>,
}

impl ConnectionFilter {
    /// Handle one connect (`connected = true`) or disconnect signal.
    pub fn on_signal(&self, identifier: String, connected: bool) -> Admission {
        self.memo.info(format_args!(
            "new connection {{device: {identifier}, connected: {connected}}}"
        ));

        let Some(events) = self.events.upgrade() else {
            if connected {
                self.kick(identifier, Duration::ZERO);
            }
            return Admission::Closed;
        };

        if events.capacity() == 0 {
            self.memo
                .info(format_args!("event queue full, rejecting {identifier}"));
            if connected {
                self.kick(identifier, self.flood_reject_delay);
            }
            return Admission::Flooded;
        }

        let actor = Actor::from_identifier(identifier);
        if !self.registry.is_known(&actor.identifier) {
            self.memo.info(format_args!("unknown actor: {actor}"));
            if connected {
                self.kick(actor.identifier, self.unknown_disconnect_delay);
            }
            return Admission::Unknown;
        }

        let action = Action::from_connected(connected);
        match events.try_send(Event::now(actor, action)) {
            Ok(()) => Admission::Admitted(action),
            Err(TrySendError::Full(event)) => {
                if connected {
                    self.kick(event.actor.identifier, self.flood_reject_delay);
                }
                Admission::Flooded
            }
            Err(TrySendError::Closed(_)) => Admission::Closed,
        }
    }

    fn kick(&self, identifier: String, after: Duration) {
        if self
            .disconnects
            .send(DisconnectRequest { identifier, after })
            .is_err()
        {
            warn!("Disconnect worker has stopped");
        }
    }
}

/// Owns the radio adapter and produces the presence event stream.
pub struct ProximityRadar<R> {
    radio: Arc<R>,
    registry: Arc<ActorRegistry>,
    settings: RadarSettings,
    memo: Arc<RateLimitedLogger>,
}

impl<R: Radio> ProximityRadar<R> {
    /// Create a radar around `radio`.
    pub fn new(
        radio: Arc<R>,
        registry: Arc<ActorRegistry>,
        settings: RadarSettings,
        memo: Arc<RateLimitedLogger>,
    ) -> Self {
        Self {
            radio,
            registry,
            settings,
            memo,
        }
    }

    /// Radar settings.
    pub const fn settings(&self) -> &RadarSettings {
        &self.settings
    }

    /// Enable the adapter, register the connection filter and start the
    /// advertise/stop cycle.
    ///
    /// The returned stream yields presence events for known actors and ends
    /// when advertising fails or the radio stops reporting connections.
    ///
    /// # Errors
    ///
    /// Returns [`RadarError::Radio`] if the adapter cannot be enabled.
    pub async fn search(&self) -> Result<EventStream, RadarError> {
        self.radio.enable().await?;

        let (events_tx, events_rx) = mpsc::channel(self.settings.pool_size);
        let (disconnect_tx, disconnect_rx) = mpsc::unbounded_channel();
        tokio::spawn(disconnect_worker(Arc::clone(&self.radio), disconnect_rx));

        let filter = ConnectionFilter {
            events: events_tx.downgrade(),
            disconnects: disconnect_tx,
            registry: Arc::clone(&self.registry),
            unknown_disconnect_delay: self.settings.unknown_disconnect_delay,
            flood_reject_delay: self.settings.flood_reject_delay,
            memo: Arc::clone(&self.memo),
        };
        let monitor = self
            .radio
            .set_connect_handler(Arc::new(move |identifier, connected| {
                let admission = filter.on_signal(identifier, connected);
                debug!(?admission, "Connection signal classified");
            }));

        tokio::spawn(advertise_loop(
            Arc::clone(&self.radio),
            self.settings.clone(),
            events_tx,
            monitor,
        ));
        info!(
            name = %self.settings.advertisement_name,
            pool_size = self.settings.pool_size,
            known_actors = self.registry.len(),
            "Radar searching"
        );
        Ok(events_rx)
    }

    /// Best-effort write of `payload` to a connected known actor.
    ///
    /// # Errors
    ///
    /// Returns [`RadarError::UnknownRecipient`] for actors off the allow-list,
    /// or the radio's write error.
    pub async fn message(&self, payload: &Payload) -> Result<(), RadarError> {
        let recipient = &payload.recipient.identifier;
        if !self.registry.is_known(recipient) {
            return Err(RadarError::UnknownRecipient(recipient.clone()));
        }
        self.radio
            .write_characteristic(
                recipient,
                self.settings.indicate_characteristic_uuid,
                &payload.to_bytes(),
            )
            .await?;
        Ok(())
    }
}

async fn disconnect_worker<R: Radio>(
    radio: Arc<R>,
    mut requests: mpsc::UnboundedReceiver<DisconnectRequest>,
) {
    while let Some(request) = requests.recv().await {
        let radio = Arc::clone(&radio);
        tokio::spawn(async move {
            tokio::time::sleep(request.after).await;
            match radio.disconnect(&request.identifier).await {
                Ok(()) => debug!(device = %request.identifier, "Disconnected"),
                Err(e) => warn!(device = %request.identifier, error = %e, "Disconnect failed"),
            }
        });
    }
}

async fn advertise_loop<R: Radio>(
    radio: Arc<R>,
    settings: RadarSettings,
    events: mpsc::Sender<Event>,
    monitor: MonitorFailure,
) {
    tokio::select! {
        err = advertise_cycle(radio.as_ref(), &settings) => {
            error!(error = %err, "Advertising failed, closing event stream");
        }
        failure = monitor => {
            let err = failure.unwrap_or_else(|_| RadioError::MonitorFailed {
                message: "connection monitor dropped".to_string(),
            });
            error!(error = %err, "Connection monitor stopped, closing event stream");
            if let Err(e) = radio.stop_advertise().await {
                debug!(error = %e, "Stop advertising after monitor failure");
            }
        }
    }
    // Last strong sender: dropping it ends the stream for the event loop.
    drop(events);
}

/// Advertise, wait one window, stop, repeat. Returns only on failure.
async fn advertise_cycle<R: Radio>(radio: &R, settings: &RadarSettings) -> RadioError {
    loop {
        if let Err(e) = radio
            .advertise(
                &settings.advertisement_name,
                settings.service_uuid,
                settings.advertisement_window,
            )
            .await
        {
            return e;
        }
        debug!(name = %settings.advertisement_name, "Advertising");
        tokio::time::sleep(settings.advertisement_window).await;
        if let Err(e) = radio.stop_advertise().await {
            return e;
        }
        debug!(name = %settings.advertisement_name, "Stopped advertising");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRadio;
    use tokio::sync::mpsc::error::TryRecvError;

    const KNOWN: &str = "AA:BB:CC:DD:EE:FF";
    const STRANGER: &str = "11:22:33:44:55:66";

    fn settings(pool_size: usize) -> RadarSettings {
        RadarSettings {
            pool_size,
            ..RadarSettings::from(&BluetoothConfig::default())
        }
    }

    fn radar(radio: &MockRadio, pool_size: usize) -> ProximityRadar<MockRadio> {
        ProximityRadar::new(
            Arc::new(radio.clone()),
            Arc::new(ActorRegistry::new([KNOWN])),
            settings(pool_size),
            Arc::new(RateLimitedLogger::default()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_enables_and_advertises() {
        let radio = MockRadio::new();
        let _events = radar(&radio, 10).search().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(radio.is_enabled());
        assert!(radio.is_advertising());

        tokio::time::sleep(Duration::from_millis(5_100)).await;
        assert_eq!(radio.advertise_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enable_failure_is_reported() {
        let radio = MockRadio::new().failing_enable();
        let err = radar(&radio, 10).search().await.unwrap_err();
        assert!(matches!(err, RadarError::Radio(RadioError::EnableFailed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_known_actor_produces_events() {
        let radio = MockRadio::new();
        let mut events = radar(&radio, 10).search().await.unwrap();

        assert!(radio.signal(KNOWN, true));
        assert!(radio.signal("aa:bb:cc:dd:ee:ff", false));

        let entering = events.recv().await.unwrap();
        assert_eq!(entering.action, Action::Entering);
        assert_eq!(entering.actor.identifier, KNOWN);
        let exiting = events.recv().await.unwrap();
        assert_eq!(exiting.action, Action::Exiting);
        assert!(radio.disconnects().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_actor_is_kicked_after_grace_delay() {
        let radio = MockRadio::new();
        let mut events = radar(&radio, 10).search().await.unwrap();

        radio.signal(STRANGER, true);
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

        tokio::time::sleep(Duration::from_millis(2_900)).await;
        assert!(radio.disconnects().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(radio.disconnects(), vec![STRANGER.to_string()]);
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_rejects_without_blocking() {
        let radio = MockRadio::new();
        let mut events = radar(&radio, 2).search().await.unwrap();

        radio.signal(KNOWN, true);
        radio.signal(KNOWN, false);
        radio.signal(KNOWN, true);
        assert_eq!(events.len(), 2);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(radio.disconnects(), vec![KNOWN.to_string()]);

        assert_eq!(events.recv().await.unwrap().action, Action::Entering);
        assert_eq!(events.recv().await.unwrap().action, Action::Exiting);
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_allow_listed_identifiers_reach_the_queue() {
        let radio = MockRadio::new();
        let mut events = radar(&radio, 64).search().await.unwrap();
        let identifiers = [KNOWN, STRANGER, "aa:bb:cc:dd:ee:ff", "AA:BB:CC:DD:EE:00"];

        for (i, identifier) in identifiers.iter().cycle().take(40).enumerate() {
            radio.signal(identifier, i % 3 != 0);
        }

        let mut received = 0;
        while let Ok(event) = events.try_recv() {
            assert!(event.actor.identifier.eq_ignore_ascii_case(KNOWN));
            received += 1;
        }
        assert_eq!(received, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_advertise_failure_closes_stream() {
        let radio = MockRadio::new().failing_advertise_after(1);
        let mut events = radar(&radio, 10).search().await.unwrap();

        radio.signal(KNOWN, true);
        assert_eq!(events.recv().await.unwrap().action, Action::Entering);
        assert!(events.recv().await.is_none());

        // Signals after the radar died are refused.
        radio.signal(KNOWN, true);
        assert!(events.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connections_after_closure_are_kicked_immediately() {
        let radio = MockRadio::new().failing_advertise_after(1);
        let mut events = radar(&radio, 10).search().await.unwrap();
        assert!(events.recv().await.is_none());

        assert!(radio.signal(KNOWN, true));
        assert!(radio.signal(STRANGER, true));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(
            radio.disconnects(),
            vec![KNOWN.to_string(), STRANGER.to_string()]
        );

        // Disconnections have nothing to kick.
        assert!(radio.signal(KNOWN, false));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(radio.disconnects().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_failure_closes_stream() {
        let radio = MockRadio::new();
        let mut events = radar(&radio, 10).search().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(radio.is_advertising());

        radio.signal(KNOWN, true);
        assert!(radio.fail_monitor());
        assert_eq!(events.recv().await.unwrap().action, Action::Entering);
        assert!(events.recv().await.is_none());
        assert!(!radio.is_advertising());
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_known_actor() {
        let radio = MockRadio::new();
        let radar = radar(&radio, 10);
        let _events = radar.search().await.unwrap();
        radio.signal(KNOWN, true);

        let payload = Payload {
            recipient: Actor::from_identifier(KNOWN),
            header: "relay".to_string(),
            message: "on".to_string(),
        };
        radar.message(&payload).await.unwrap();

        let writes = radio.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1, radar.settings().indicate_characteristic_uuid);
        assert_eq!(writes[0].2, b"relay on".to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_unknown_actor_is_refused() {
        let radio = MockRadio::new();
        let radar = radar(&radio, 10);
        let payload = Payload {
            recipient: Actor::from_identifier(STRANGER),
            header: "h".to_string(),
            message: "m".to_string(),
        };
        assert!(matches!(
            radar.message(&payload).await,
            Err(RadarError::UnknownRecipient(_))
        ));
        assert!(radio.writes().is_empty());
    }
}
