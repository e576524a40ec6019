//! Radio capability consumed by the proximity radar.
//!
//! Everything the radar needs from a BLE stack fits in [`Radio`]. The BlueZ
//! implementation lives in [`crate::bluetooth`]; tests use
//! [`crate::mock::MockRadio`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Connection-state callback: `(identifier, connected)`.
///
/// Invoked on the radio's own execution context, from inside a Tokio runtime.
/// Implementations of the callback must not block.
pub type ConnectHandler = Arc<dyn Fn(String, bool) + Send + Sync>;

/// Resolves once the radio can no longer deliver connection changes to the
/// registered handler. A closed channel means the same thing.
pub type MonitorFailure = oneshot::Receiver<RadioError>;

/// Errors raised by a radio adapter.
#[derive(Debug, Error)]
pub enum RadioError {
    /// No adapter was found.
    #[error("no Bluetooth adapter found")]
    AdapterNotFound,

    /// The adapter could not be powered on.
    #[error("failed to enable Bluetooth adapter: {message}")]
    EnableFailed {
        /// Driver message.
        message: String,
    },

    /// Configuring, starting or stopping the advertisement failed.
    #[error("advertisement failed: {message}")]
    AdvertiseFailed {
        /// Driver message.
        message: String,
    },

    /// The identifier is not a valid radio address.
    #[error("invalid Bluetooth address: {address}")]
    InvalidAddress {
        /// Offending identifier.
        address: String,
    },

    /// Disconnecting a device failed.
    #[error("failed to disconnect {address}: {message}")]
    DisconnectFailed {
        /// Device address.
        address: String,
        /// Driver message.
        message: String,
    },

    /// The device does not expose the requested characteristic.
    #[error("{address} has no characteristic {uuid}")]
    CharacteristicNotFound {
        /// Device address.
        address: String,
        /// Characteristic UUID.
        uuid: Uuid,
    },

    /// Connection changes can no longer be observed.
    #[error("connection monitor failed: {message}")]
    MonitorFailed {
        /// Driver message.
        message: String,
    },

    /// Writing a characteristic failed.
    #[error("failed to write to {address}: {message}")]
    WriteFailed {
        /// Device address.
        address: String,
        /// Driver message.
        message: String,
    },
}

/// A BLE adapter acting as a discoverable peripheral.
#[async_trait]
pub trait Radio: Send + Sync + 'static {
    /// Power the adapter on.
    async fn enable(&self) -> Result<(), RadioError>;

    /// Start advertising `name` with `service` for up to `window`.
    async fn advertise(&self, name: &str, service: Uuid, window: Duration)
        -> Result<(), RadioError>;

    /// Stop the current advertisement.
    async fn stop_advertise(&self) -> Result<(), RadioError>;

    /// Register the connection-state callback, replacing any previous one.
    ///
    /// The returned receiver reports the death of whatever delivers the
    /// callbacks. Replacing the handler closes the previous receiver.
    fn set_connect_handler(&self, handler: ConnectHandler) -> MonitorFailure;

    /// Drop the connection to `identifier`.
    async fn disconnect(&self, identifier: &str) -> Result<(), RadioError>;

    /// Write `bytes` to `characteristic` on the connected device `identifier`.
    async fn write_characteristic(
        &self,
        identifier: &str,
        characteristic: Uuid,
        bytes: &[u8],
    ) -> Result<(), RadioError>;
}
