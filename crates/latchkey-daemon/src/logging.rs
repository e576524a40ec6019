//! Logging initialization.
//!
//! - **Production**: JSON logs to rolling files + compact logs to stdout
//! - **Development**: Pretty logs to stdout with span events
//!
//! The filter comes from `RUST_LOG`, then `LATCHKEY_LOG_LEVEL`, then the
//! `[logging]` section of the configuration.

use std::path::PathBuf;
use std::sync::OnceLock;

use latchkey_core::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable overriding the log filter.
pub const LOG_LEVEL_ENV: &str = "LATCHKEY_LOG_LEVEL";

/// Environment variable selecting production logging (`production`).
pub const ENV_MODE_ENV: &str = "LATCHKEY_ENV";

/// Keeps the non-blocking writers alive for the lifetime of the program.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static STDOUT_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Whether `LATCHKEY_ENV` asks for production logging.
#[must_use]
pub fn is_production() -> bool {
    std::env::var(ENV_MODE_ENV).is_ok_and(|mode| mode.eq_ignore_ascii_case("production"))
}

/// Filter directive used when `RUST_LOG` is not set.
#[must_use]
pub fn filter_directive(config: &LoggingConfig) -> String {
    std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| config.filter_directive().to_string())
}

/// Install the global subscriber.
///
/// # Production Mode
///
/// - Rolling daily files in `/var/log/latchkey/`, JSON formatted
/// - Compact stdout without ANSI colors for journald
///
/// # Development Mode
///
/// - Pretty stdout with span events
///
/// # Errors
///
/// Returns an error if the filter cannot be parsed.
pub fn init(config: &LoggingConfig, is_production: bool) -> anyhow::Result<()> {
    let directive = filter_directive(config);
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&directive))?;

    if is_production {
        init_production(env_filter);
    } else {
        init_development(env_filter);
    }

    Ok(())
}

fn init_production(env_filter: EnvFilter) {
    let log_dir = log_directory();
    if !log_dir.exists() {
        std::fs::create_dir_all(&log_dir).ok();
    }

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "latchkey");
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
    let (non_blocking_stdout, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking_file)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(non_blocking_stdout)
        .with_target(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);
}

fn init_development(env_filter: EnvFilter) {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .init();
}

/// Log directory for the current platform.
fn log_directory() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/latchkey")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "latchkey")
            .map_or_else(|| PathBuf::from("./logs"), |dirs| dirs.data_dir().join("logs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_directory_is_valid_path() {
        assert!(!log_directory().as_os_str().is_empty());
    }

    #[test]
    fn test_directive_follows_config() {
        // Only meaningful when the override is not set in the test environment.
        if std::env::var(LOG_LEVEL_ENV).is_ok() {
            return;
        }
        let mut config = LoggingConfig::default();
        assert_eq!(filter_directive(&config), "info");
        config.verbose = true;
        assert_eq!(filter_directive(&config), "debug");
        config.enabled = false;
        assert_eq!(filter_directive(&config), "off");
    }

    #[test]
    fn test_directives_parse() {
        for directive in ["off", "info", "debug", "latchkey_core=debug,info"] {
            assert!(EnvFilter::try_new(directive).is_ok(), "{directive}");
        }
    }
}
