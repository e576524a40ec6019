//! Application configuration management.
//!
//! Handles loading and validating latchkey configuration including:
//! - Bluetooth advertisement and connection pool settings
//! - The allow-list of known actors
//! - Event loop sampling cadence
//! - Relay terminals, delays and debounce windows
//! - Logging and status endpoint toggles
//!
//! Configuration is read once at startup and passed by reference into each
//! component's constructor. Nothing in the core reads global state.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Environment variable that overrides the configuration file location.
pub const CONFIG_PATH_ENV: &str = "LATCHKEY_CONFIG";

/// Default advertised service UUID.
pub const DEFAULT_SERVICE_UUID: Uuid = Uuid::from_u128(0x6c61_7463_686b_6579_0001_0000_0000_0001);

/// Default characteristic used for out-of-band messages.
pub const DEFAULT_INDICATE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x6c61_7463_686b_6579_0001_0000_0000_0002);

static MAC_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}$").expect("MAC address pattern is valid")
});

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("configuration file not found: {0}")]
    NotFound(String),

    /// The configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    ReadError {
        /// Path that failed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for this schema.
    #[error("failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    /// A single field failed validation.
    #[error("invalid `{field}`: {message}")]
    ValidationError {
        /// Dotted path of the offending field.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields failed validation.
    #[error("{} configuration errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Returns `true` if `address` looks like `AA:BB:CC:DD:EE:FF`.
#[must_use]
pub fn is_valid_mac_address(address: &str) -> bool {
    MAC_ADDRESS.is_match(address)
}

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Radio advertisement and connection handling.
    pub bluetooth: BluetoothConfig,
    /// Allow-listed actors.
    pub actors: ActorsConfig,
    /// Sampling cadence of the event loop.
    pub event_loop: EventLoopConfig,
    /// Relay terminals and timing.
    pub relay: RelayConfig,
    /// Logging switches.
    pub logging: LoggingConfig,
    /// Optional read-only status endpoint.
    pub status: StatusConfig,
}

/// Bluetooth advertisement settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Local name carried in the advertisement.
    pub advertisement_name: String,
    /// How long each advertisement runs before it is restarted.
    pub advertisement_window_ms: u64,
    /// Advertised GATT service.
    pub service_uuid: Uuid,
    /// Characteristic written by out-of-band messages.
    pub indicate_characteristic_uuid: Uuid,
    /// Capacity of the presence event queue.
    pub connection_pool_size: usize,
    /// Grace period before an unknown actor is disconnected.
    pub unknown_disconnect_delay_ms: u64,
    /// Delay before a connection is kicked because the queue is full.
    pub flood_reject_delay_ms: u64,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            advertisement_name: "latchkey".to_string(),
            advertisement_window_ms: 5_000,
            service_uuid: DEFAULT_SERVICE_UUID,
            indicate_characteristic_uuid: DEFAULT_INDICATE_CHARACTERISTIC_UUID,
            connection_pool_size: 10,
            unknown_disconnect_delay_ms: 3_000,
            flood_reject_delay_ms: 100,
        }
    }
}

impl BluetoothConfig {
    /// Advertisement window as a [`Duration`].
    #[must_use]
    pub const fn advertisement_window(&self) -> Duration {
        Duration::from_millis(self.advertisement_window_ms)
    }

    /// Unknown-actor grace delay as a [`Duration`].
    #[must_use]
    pub const fn unknown_disconnect_delay(&self) -> Duration {
        Duration::from_millis(self.unknown_disconnect_delay_ms)
    }

    /// Flood-reject delay as a [`Duration`].
    #[must_use]
    pub const fn flood_reject_delay(&self) -> Duration {
        Duration::from_millis(self.flood_reject_delay_ms)
    }
}

/// Allow-listed radio identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorsConfig {
    /// Known radio addresses, compared case-insensitively.
    pub known: Vec<String>,
}

/// Event loop cadence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLoopConfig {
    /// Time between two drains of the event queue.
    pub sample_interval_ms: u64,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 3_000,
        }
    }
}

impl EventLoopConfig {
    /// Sampling interval as a [`Duration`].
    #[must_use]
    pub const fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

/// How presence maps onto the relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayMode {
    /// Entering closes the relay, exiting opens it.
    #[default]
    Latching,
    /// Entering pulses the relay once, exiting does nothing.
    Momentary,
}

/// Relay terminals and timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Latching or momentary operation.
    pub mode: RelayMode,
    /// Terminal claimed first.
    pub primary_terminal: String,
    /// Terminal claimed when the primary is unavailable.
    pub backup_terminal: String,
    /// Pause before each write so a prior transition can finish.
    pub settle_delay_ms: u64,
    /// Minimum time between two successful writes.
    pub debounce_ms: u64,
    /// Minimum time between two momentary presses.
    pub min_operate_interval_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            mode: RelayMode::Latching,
            primary_terminal: "GPIO17".to_string(),
            backup_terminal: "GPIO27".to_string(),
            settle_delay_ms: 1_000,
            debounce_ms: 1_000,
            min_operate_interval_ms: 5_000,
        }
    }
}

impl RelayConfig {
    /// Settle delay as a [`Duration`].
    #[must_use]
    pub const fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Debounce window as a [`Duration`].
    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Momentary operate gate as a [`Duration`].
    #[must_use]
    pub const fn min_operate_interval(&self) -> Duration {
        Duration::from_millis(self.min_operate_interval_ms)
    }
}

/// Logging switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Emit any logs at all.
    pub enabled: bool,
    /// Include debug-level output.
    pub verbose: bool,
    /// Window during which identical messages are collapsed.
    pub suppression_window_secs: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            verbose: false,
            suppression_window_secs: 60,
        }
    }
}

impl LoggingConfig {
    /// Suppression window as a [`Duration`].
    #[must_use]
    pub const fn suppression_window(&self) -> Duration {
        Duration::from_secs(self.suppression_window_secs)
    }

    /// Default tracing filter directive for these switches.
    #[must_use]
    pub const fn filter_directive(&self) -> &'static str {
        match (self.enabled, self.verbose) {
            (false, _) => "off",
            (true, true) => "debug",
            (true, false) => "info",
        }
    }
}

/// Read-only HTTP status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Serve `/health`.
    pub enabled: bool,
    /// Listen address.
    pub bind: String,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: "127.0.0.1:3000".to_string(),
        }
    }
}

impl Config {
    /// Load and validate configuration from `path`.
    ///
    /// A missing file is an error: the allow-list has no sensible default.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file is missing, unreadable, malformed
    /// or fails validation.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the text is malformed or fails validation.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the configuration path: `LATCHKEY_CONFIG` if set, otherwise the
    /// platform default.
    #[must_use]
    pub fn resolve_path() -> PathBuf {
        std::env::var_os(CONFIG_PATH_ENV).map_or_else(Self::default_path, PathBuf::from)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        // On Raspberry Pi: /etc/latchkey/config.toml
        // For development: ~/.config/latchkey/config.toml
        #[cfg(target_os = "linux")]
        {
            PathBuf::from("/etc/latchkey/config.toml")
        }
        #[cfg(not(target_os = "linux"))]
        {
            directories::ProjectDirs::from("", "", "latchkey").map_or_else(
                || PathBuf::from("config.toml"),
                |dirs| dirs.config_dir().join("config.toml"),
            )
        }
    }

    /// Parsed status endpoint address.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `status.bind` is not a socket address.
    pub fn status_addr(&self) -> ConfigResult<SocketAddr> {
        self.status
            .bind
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::ValidationError {
                field: "status.bind".to_string(),
                message: e.to_string(),
            })
    }

    /// Check every field, reporting all problems at once.
    ///
    /// # Errors
    ///
    /// Returns the single failure, or [`ConfigError::MultipleValidationErrors`].
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let mut fail = |field: &str, message: &str| {
            errors.push(ConfigError::ValidationError {
                field: field.to_string(),
                message: message.to_string(),
            });
        };

        if self.bluetooth.advertisement_name.trim().is_empty() {
            fail("bluetooth.advertisement_name", "must not be empty");
        }
        if self.bluetooth.advertisement_window_ms == 0 {
            fail("bluetooth.advertisement_window_ms", "must be greater than zero");
        }
        if self.bluetooth.connection_pool_size == 0 {
            fail("bluetooth.connection_pool_size", "must be greater than zero");
        }
        if self.event_loop.sample_interval_ms == 0 {
            fail("event_loop.sample_interval_ms", "must be greater than zero");
        }
        if self.logging.suppression_window_secs == 0 {
            fail("logging.suppression_window_secs", "must be greater than zero");
        }
        if self.relay.primary_terminal.trim().is_empty() {
            fail("relay.primary_terminal", "must not be empty");
        }
        for address in &self.actors.known {
            if !is_valid_mac_address(address) {
                fail(
                    "actors.known",
                    &format!("'{address}' is not a XX:XX:XX:XX:XX:XX address"),
                );
            }
        }
        if let Err(e) = self.status_addr() {
            errors.push(e);
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const EXAMPLE: &str = r#"
        [bluetooth]
        advertisement_name = "X"
        connection_pool_size = 10

        [actors]
        known = ["AA:BB:CC:DD:EE:FF"]

        [event_loop]
        sample_interval_ms = 3000
    "#;

    #[test]
    fn test_parse_example_fills_defaults() {
        let config = Config::from_toml_str(EXAMPLE).unwrap();
        assert_eq!(config.bluetooth.advertisement_name, "X");
        assert_eq!(config.bluetooth.connection_pool_size, 10);
        assert_eq!(config.actors.known, vec!["AA:BB:CC:DD:EE:FF".to_string()]);
        assert_eq!(config.event_loop.sample_interval(), Duration::from_secs(3));
        assert_eq!(config.relay, RelayConfig::default());
        assert_eq!(config.bluetooth.service_uuid, DEFAULT_SERVICE_UUID);
    }

    #[test]
    fn test_relay_mode_parses_lowercase() {
        let config = Config::from_toml_str("[relay]\nmode = \"momentary\"").unwrap();
        assert_eq!(config.relay.mode, RelayMode::Momentary);
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_mac_address_validation() {
        assert!(is_valid_mac_address("AA:BB:CC:DD:EE:FF"));
        assert!(is_valid_mac_address("aa:bb:cc:dd:ee:ff"));
        assert!(!is_valid_mac_address("AA:BB:CC:DD:EE"));
        assert!(!is_valid_mac_address("AA-BB-CC-DD-EE-FF"));
        assert!(!is_valid_mac_address("GG:BB:CC:DD:EE:FF"));
    }

    #[test]
    fn test_single_validation_error() {
        let err = Config::from_toml_str("[bluetooth]\nconnection_pool_size = 0").unwrap_err();
        match err {
            ConfigError::ValidationError { field, .. } => {
                assert_eq!(field, "bluetooth.connection_pool_size");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_multiple_validation_errors_are_collected() {
        let content = r#"
            [bluetooth]
            advertisement_name = ""
            [actors]
            known = ["not-a-mac"]
            [status]
            bind = "nowhere"
        "#;
        match Config::from_toml_str(content).unwrap_err() {
            ConfigError::MultipleValidationErrors(errors) => assert_eq!(errors.len(), 3),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_error() {
        let err = tokio_test::assert_err!(Config::from_toml_str("[bluetooth\n"));
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(dir.path().join("config.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(EXAMPLE.as_bytes()).unwrap();
        let config = tokio_test::assert_ok!(Config::load(file.path()));
        assert_eq!(config.bluetooth.advertisement_name, "X");
    }

    #[test]
    fn test_logging_filter_directive() {
        let mut logging = LoggingConfig::default();
        assert_eq!(logging.filter_directive(), "info");
        logging.verbose = true;
        assert_eq!(logging.filter_directive(), "debug");
        logging.enabled = false;
        assert_eq!(logging.filter_directive(), "off");
    }

    #[test]
    fn test_default_path_is_not_empty() {
        assert!(!Config::default_path().as_os_str().is_empty());
    }
}
