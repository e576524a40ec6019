//! Unified error type for the latchkey core library.
//!
//! Every module keeps its own narrow error ([`ConfigError`], [`RadioError`],
//! [`RadarError`], [`GpioError`], [`RelayError`]). [`LatchkeyError`] is what
//! crosses the crate boundary: the daemon classifies it to decide whether to
//! keep running and logs its [`error_code`](LatchkeyError::error_code).
//!
//! # Example
//!
//! ```rust
//! use latchkey_core::error::{LatchkeyError, Result};
//! use std::path::PathBuf;
//!
//! fn require_config(path: &PathBuf) -> Result<()> {
//!     if !path.exists() {
//!         return Err(LatchkeyError::ConfigNotFound(path.clone()));
//!     }
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::gpio::GpioError;
use crate::radar::RadarError;
use crate::radio::RadioError;
use crate::relay::{RelayError, RelayState};

/// The unified error type for all latchkey operations.
#[derive(Debug, Error)]
pub enum LatchkeyError {
    // =========================================================================
    // BLUETOOTH ERRORS
    // =========================================================================
    /// No Bluetooth adapter was found on this system.
    #[error(
        "No Bluetooth adapter found. Ensure Bluetooth hardware is present and bluetoothd is running."
    )]
    BluetoothAdapterNotFound,

    /// The adapter exists but could not be powered on.
    #[error("Failed to enable Bluetooth adapter: {0}")]
    BluetoothEnableFailed(String),

    /// Starting or stopping the advertisement failed.
    #[error("Advertisement failed: {0}")]
    AdvertisementFailed(String),

    /// A per-device operation (disconnect, characteristic write) failed.
    #[error("Bluetooth device operation failed: {0}")]
    DeviceOperationFailed(String),

    /// Connection changes can no longer be observed.
    #[error("Connection monitor failed: {0}")]
    ConnectionMonitorFailed(String),

    /// An identifier is not a Bluetooth address.
    #[error("Invalid Bluetooth address: '{0}'. Expected format 'AA:BB:CC:DD:EE:FF'.")]
    InvalidAddress(String),

    /// A message was addressed to an actor outside the allow-list.
    #[error("Refusing to message unknown actor '{0}'")]
    UnknownRecipient(String),

    /// The radar stopped producing events.
    #[error("Event stream closed. The radar stopped advertising.")]
    EventStreamClosed,

    // =========================================================================
    // RELAY ERRORS
    // =========================================================================
    /// Neither relay terminal could be claimed.
    #[error("No relay terminal available: {0}")]
    TerminalClaimFailed(String),

    /// Driving the relay output failed.
    #[error("Relay write failed: {0}")]
    RelayWriteFailed(String),

    /// A relative operation was requested from a state it is not defined for.
    #[error("Relay state is {0}; operation requires on or off")]
    InvalidRelayState(RelayState),

    /// A GPIO call outside the relay failed.
    #[error("GPIO error: {0}")]
    GpioFailed(String),

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // I/O ERRORS
    // =========================================================================
    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for latchkey operations.
pub type Result<T> = std::result::Result<T, LatchkeyError>;

impl LatchkeyError {
    /// Returns `true` if this error comes from the radio side.
    #[inline]
    #[must_use]
    pub const fn is_bluetooth_error(&self) -> bool {
        matches!(
            self,
            Self::BluetoothAdapterNotFound
                | Self::BluetoothEnableFailed(_)
                | Self::AdvertisementFailed(_)
                | Self::DeviceOperationFailed(_)
                | Self::ConnectionMonitorFailed(_)
                | Self::InvalidAddress(_)
                | Self::UnknownRecipient(_)
                | Self::EventStreamClosed
        )
    }

    /// Returns `true` if this error comes from the relay or GPIO side.
    #[inline]
    #[must_use]
    pub const fn is_relay_error(&self) -> bool {
        matches!(
            self,
            Self::TerminalClaimFailed(_)
                | Self::RelayWriteFailed(_)
                | Self::InvalidRelayState(_)
                | Self::GpioFailed(_)
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error is a raw I/O failure.
    #[inline]
    #[must_use]
    pub const fn is_io_error(&self) -> bool {
        matches!(self, Self::IoError(_))
    }

    /// Returns `true` if the daemon cannot continue after this error.
    ///
    /// Per-event failures (a relay write, a disconnect, a message) are logged
    /// and the daemon keeps running. Startup failures and the loss of the
    /// event stream end the process.
    #[inline]
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::BluetoothAdapterNotFound
                | Self::BluetoothEnableFailed(_)
                | Self::ConnectionMonitorFailed(_)
                | Self::EventStreamClosed
                | Self::TerminalClaimFailed(_)
                | Self::ConfigNotFound(_)
                | Self::ConfigParseError(_)
                | Self::ConfigValidationError(_)
        )
    }

    /// Returns a machine-readable error code.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::BluetoothAdapterNotFound => "BLUETOOTH_ADAPTER_NOT_FOUND",
            Self::BluetoothEnableFailed(_) => "BLUETOOTH_ENABLE_FAILED",
            Self::AdvertisementFailed(_) => "ADVERTISEMENT_FAILED",
            Self::DeviceOperationFailed(_) => "DEVICE_OPERATION_FAILED",
            Self::ConnectionMonitorFailed(_) => "CONNECTION_MONITOR_FAILED",
            Self::InvalidAddress(_) => "INVALID_ADDRESS",
            Self::UnknownRecipient(_) => "UNKNOWN_RECIPIENT",
            Self::EventStreamClosed => "EVENT_STREAM_CLOSED",
            Self::TerminalClaimFailed(_) => "TERMINAL_CLAIM_FAILED",
            Self::RelayWriteFailed(_) => "RELAY_WRITE_FAILED",
            Self::InvalidRelayState(_) => "INVALID_RELAY_STATE",
            Self::GpioFailed(_) => "GPIO_FAILED",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<ConfigError> for LatchkeyError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path.into()),
            ConfigError::ReadError { source, .. } => Self::IoError(source),
            ConfigError::ParseError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<RadioError> for LatchkeyError {
    fn from(err: RadioError) -> Self {
        match err {
            RadioError::AdapterNotFound => Self::BluetoothAdapterNotFound,
            RadioError::EnableFailed { message } => Self::BluetoothEnableFailed(message),
            RadioError::AdvertiseFailed { message } => Self::AdvertisementFailed(message),
            RadioError::InvalidAddress { address } => Self::InvalidAddress(address),
            RadioError::MonitorFailed { message } => Self::ConnectionMonitorFailed(message),
            other @ (RadioError::DisconnectFailed { .. }
            | RadioError::CharacteristicNotFound { .. }
            | RadioError::WriteFailed { .. }) => Self::DeviceOperationFailed(other.to_string()),
        }
    }
}

impl From<RadarError> for LatchkeyError {
    fn from(err: RadarError) -> Self {
        match err {
            RadarError::Radio(e) => e.into(),
            RadarError::UnknownRecipient(identifier) => Self::UnknownRecipient(identifier),
        }
    }
}

impl From<GpioError> for LatchkeyError {
    fn from(err: GpioError) -> Self {
        Self::GpioFailed(err.to_string())
    }
}

impl From<RelayError> for LatchkeyError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::InvalidState(state) => Self::InvalidRelayState(state),
            claim @ RelayError::ClaimFailed { .. } => Self::TerminalClaimFailed(claim.to_string()),
            write @ RelayError::WriteFailed { .. } => Self::RelayWriteFailed(write.to_string()),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoErr, ErrorKind};

    #[test]
    fn test_bluetooth_error_classification() {
        assert!(LatchkeyError::BluetoothAdapterNotFound.is_bluetooth_error());
        assert!(LatchkeyError::AdvertisementFailed("busy".into()).is_bluetooth_error());
        assert!(LatchkeyError::EventStreamClosed.is_bluetooth_error());
        assert!(!LatchkeyError::RelayWriteFailed("x".into()).is_bluetooth_error());
        assert!(!LatchkeyError::ConfigNotFound(PathBuf::new()).is_bluetooth_error());
    }

    #[test]
    fn test_relay_error_classification() {
        assert!(LatchkeyError::TerminalClaimFailed("x".into()).is_relay_error());
        assert!(LatchkeyError::InvalidRelayState(RelayState::Unknown).is_relay_error());
        assert!(LatchkeyError::GpioFailed("x".into()).is_relay_error());
        assert!(!LatchkeyError::EventStreamClosed.is_relay_error());
    }

    #[test]
    fn test_config_error_classification() {
        assert!(LatchkeyError::ConfigNotFound(PathBuf::from("/x")).is_config_error());
        assert!(LatchkeyError::ConfigParseError("x".into()).is_config_error());
        assert!(LatchkeyError::ConfigValidationError("x".into()).is_config_error());
        assert!(!LatchkeyError::BluetoothAdapterNotFound.is_config_error());
    }

    #[test]
    fn test_io_error_classification() {
        let err = LatchkeyError::IoError(IoErr::new(ErrorKind::NotFound, "gone"));
        assert!(err.is_io_error());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_fatal_errors() {
        assert!(LatchkeyError::BluetoothAdapterNotFound.is_fatal());
        assert!(LatchkeyError::EventStreamClosed.is_fatal());
        assert!(LatchkeyError::TerminalClaimFailed("x".into()).is_fatal());
        assert!(LatchkeyError::ConfigValidationError("x".into()).is_fatal());

        assert!(!LatchkeyError::RelayWriteFailed("x".into()).is_fatal());
        assert!(!LatchkeyError::DeviceOperationFailed("x".into()).is_fatal());
        assert!(!LatchkeyError::UnknownRecipient("x".into()).is_fatal());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            LatchkeyError::BluetoothAdapterNotFound.error_code(),
            "BLUETOOTH_ADAPTER_NOT_FOUND"
        );
        assert_eq!(
            LatchkeyError::EventStreamClosed.error_code(),
            "EVENT_STREAM_CLOSED"
        );
        assert_eq!(
            LatchkeyError::InvalidRelayState(RelayState::Error).error_code(),
            "INVALID_RELAY_STATE"
        );
        assert_eq!(
            LatchkeyError::ConfigNotFound(PathBuf::new()).error_code(),
            "CONFIG_NOT_FOUND"
        );
    }

    #[test]
    fn test_from_config_error() {
        let err: LatchkeyError = ConfigError::NotFound("/etc/latchkey/config.toml".into()).into();
        assert!(matches!(err, LatchkeyError::ConfigNotFound(ref p) if p.ends_with("config.toml")));

        let err: LatchkeyError = ConfigError::MultipleValidationErrors(vec![
            ConfigError::ValidationError {
                field: "a".into(),
                message: "bad".into(),
            },
            ConfigError::ValidationError {
                field: "b".into(),
                message: "worse".into(),
            },
        ])
        .into();
        match err {
            LatchkeyError::ConfigValidationError(msg) => {
                assert!(msg.contains("`a`"));
                assert!(msg.contains("; "));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_from_radio_and_radar_errors() {
        let err: LatchkeyError = RadioError::AdapterNotFound.into();
        assert!(matches!(err, LatchkeyError::BluetoothAdapterNotFound));

        let err: LatchkeyError = RadarError::Radio(RadioError::DisconnectFailed {
            address: "AA:BB:CC:DD:EE:FF".into(),
            message: "gone".into(),
        })
        .into();
        assert!(matches!(err, LatchkeyError::DeviceOperationFailed(ref m) if m.contains("gone")));

        let err: LatchkeyError = RadioError::MonitorFailed {
            message: "bluetoothd restarted".into(),
        }
        .into();
        assert_eq!(err.error_code(), "CONNECTION_MONITOR_FAILED");
        assert!(err.is_bluetooth_error());
        assert!(err.is_fatal());

        let err: LatchkeyError = RadarError::UnknownRecipient("x".into()).into();
        assert_eq!(err.error_code(), "UNKNOWN_RECIPIENT");
    }

    #[test]
    fn test_from_relay_error() {
        let err: LatchkeyError = RelayError::InvalidState(RelayState::Unknown).into();
        assert!(matches!(
            err,
            LatchkeyError::InvalidRelayState(RelayState::Unknown)
        ));

        let err: LatchkeyError = RelayError::ClaimFailed {
            primary_terminal: "GPIO17".into(),
            primary: GpioError::NotPresent {
                terminal: "GPIO17".into(),
            },
            backup_terminal: "GPIO27".into(),
            backup: GpioError::NotPresent {
                terminal: "GPIO27".into(),
            },
        }
        .into();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("GPIO27"));
    }

    #[test]
    fn test_from_io_error() {
        let err: LatchkeyError = IoErr::new(ErrorKind::PermissionDenied, "denied").into();
        assert!(matches!(err, LatchkeyError::IoError(_)));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<LatchkeyError>();
        assert_sync::<LatchkeyError>();
    }
}
