//! Digital I/O capability consumed by the relay actuator.
//!
//! The core only needs three things from a GPIO driver: claim a terminal by
//! name, read its level, and drive it. [`SysfsGpio`] implements that over the
//! Linux sysfs interface so the daemon can run on a Raspberry Pi without a
//! HAL crate.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Electrical level of a terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    /// Driven high (relay closed).
    High,
    /// Driven low (relay open).
    Low,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => f.write_str("high"),
            Self::Low => f.write_str("low"),
        }
    }
}

/// Errors raised by a GPIO driver.
#[derive(Debug, Error)]
pub enum GpioError {
    /// The terminal name does not map to a pin on this host.
    #[error("pin {terminal} is not present on host")]
    NotPresent {
        /// Requested terminal name.
        terminal: String,
    },

    /// The terminal exists but could not be exported or configured.
    #[error("failed to set up {terminal}: {source}")]
    Setup {
        /// Terminal name.
        terminal: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Reading or writing the level failed.
    #[error("I/O on {terminal} failed: {source}")]
    Io {
        /// Terminal name.
        terminal: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The driver reported something other than `0` or `1`.
    #[error("{terminal} reported unreadable level '{value}'")]
    InvalidLevel {
        /// Terminal name.
        terminal: String,
        /// Raw value read.
        value: String,
    },
}

/// A claimed digital output.
pub trait OutputPin: Send {
    /// Terminal name this pin was claimed as.
    fn name(&self) -> &str;

    /// Read the current physical level.
    ///
    /// # Errors
    ///
    /// Returns [`GpioError`] if the level cannot be read.
    fn read(&self) -> Result<Level, GpioError>;

    /// Drive the pin to `level`.
    ///
    /// # Errors
    ///
    /// Returns [`GpioError`] if the write fails.
    fn write(&mut self, level: Level) -> Result<(), GpioError>;
}

/// A GPIO driver that hands out named terminals.
pub trait Gpio {
    /// Pin type produced by [`claim`](Self::claim).
    type Pin: OutputPin;

    /// Claim `terminal` (e.g. `GPIO17`) for output.
    ///
    /// # Errors
    ///
    /// Returns [`GpioError`] if the terminal does not exist or cannot be set up.
    fn claim(&self, terminal: &str) -> Result<Self::Pin, GpioError>;
}

/// Parse `GPIO17` / `gpio17` / `17` into a line number.
#[must_use]
pub fn line_number(terminal: &str) -> Option<u32> {
    let trimmed = terminal.trim();
    let digits = match trimmed.get(..4) {
        Some(prefix) if prefix.eq_ignore_ascii_case("gpio") => &trimmed[4..],
        _ => trimmed,
    };
    digits.parse().ok()
}

/// Labels of the SoC pin controllers whose offsets match the `GPIOn` header
/// numbering (Pi 1-3, Pi 4, Pi 5).
const SOC_CHIP_LABELS: &[&str] = &["pinctrl-bcm2835", "pinctrl-bcm2711", "pinctrl-rp1"];

#[derive(Debug, Clone, PartialEq, Eq)]
struct ChipInfo {
    label: String,
    base: u32,
    ngpio: u32,
}

fn read_chip(dir: &Path) -> Option<ChipInfo> {
    let read = |name: &str| fs::read_to_string(dir.join(name)).ok();
    Some(ChipInfo {
        label: read("label").unwrap_or_default().trim().to_string(),
        base: read("base")?.trim().parse().ok()?,
        ngpio: read("ngpio")?.trim().parse().ok()?,
    })
}

/// GPIO driver backed by `/sys/class/gpio`.
///
/// `GPIOn` names are offsets on the SoC pin controller. Newer kernels place
/// that controller at a non-zero global base (512 on Raspberry Pi OS with
/// 6.6+), so the sysfs line is `base + n`.
#[derive(Debug, Clone)]
pub struct SysfsGpio {
    root: PathBuf,
}

impl Default for SysfsGpio {
    fn default() -> Self {
        Self::new("/sys/class/gpio")
    }
}

impl SysfsGpio {
    /// Use a custom sysfs root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The sysfs root in use.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The SoC pin controller, if the tree lists any `gpiochip*`.
    ///
    /// Picks the chip with a known SoC label, otherwise the one with the
    /// lowest base.
    fn soc_chip(&self) -> Option<ChipInfo> {
        let chips: Vec<ChipInfo> = fs::read_dir(&self.root)
            .ok()?
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().starts_with("gpiochip"))
            .filter_map(|entry| read_chip(&entry.path()))
            .collect();

        let labelled = chips
            .iter()
            .position(|chip| SOC_CHIP_LABELS.contains(&chip.label.as_str()));
        let index = labelled.or_else(|| {
            chips
                .iter()
                .enumerate()
                .min_by_key(|(_, chip)| chip.base)
                .map(|(i, _)| i)
        })?;
        chips.into_iter().nth(index)
    }

    /// Global sysfs line for a `GPIOn` offset, or `None` if the controller
    /// has no such offset. A tree without chip directories maps offsets 1:1.
    fn global_line(&self, offset: u32) -> Option<u32> {
        match self.soc_chip() {
            Some(chip) => (offset < chip.ngpio).then(|| chip.base + offset),
            None => Some(offset),
        }
    }
}

impl Gpio for SysfsGpio {
    type Pin = SysfsPin;

    fn claim(&self, terminal: &str) -> Result<SysfsPin, GpioError> {
        let offset = line_number(terminal).ok_or_else(|| GpioError::NotPresent {
            terminal: terminal.to_string(),
        })?;
        if !sysfs_available(&self.root) {
            return Err(GpioError::NotPresent {
                terminal: terminal.to_string(),
            });
        }
        let line = self
            .global_line(offset)
            .ok_or_else(|| GpioError::NotPresent {
                terminal: terminal.to_string(),
            })?;

        let dir = self.root.join(format!("gpio{line}"));
        let setup = |source| GpioError::Setup {
            terminal: terminal.to_string(),
            source,
        };
        if !dir.exists() {
            fs::write(self.root.join("export"), line.to_string()).map_err(setup)?;
        }

        let pin = SysfsPin {
            name: terminal.to_string(),
            dir,
        };
        // Switching to output with an explicit level keeps the relay where it
        // is instead of dropping it low.
        let current = pin.read().unwrap_or(Level::Low);
        let direction = match current {
            Level::High => "high",
            Level::Low => "low",
        };
        fs::write(pin.dir.join("direction"), direction).map_err(setup)?;
        Ok(pin)
    }
}

/// A pin exported through sysfs.
#[derive(Debug)]
pub struct SysfsPin {
    name: String,
    dir: PathBuf,
}

impl SysfsPin {
    fn value_path(&self) -> PathBuf {
        self.dir.join("value")
    }

    fn io_error(&self, source: std::io::Error) -> GpioError {
        GpioError::Io {
            terminal: self.name.clone(),
            source,
        }
    }
}

impl OutputPin for SysfsPin {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self) -> Result<Level, GpioError> {
        let raw = fs::read_to_string(self.value_path()).map_err(|e| self.io_error(e))?;
        parse_level(&self.name, &raw)
    }

    fn write(&mut self, level: Level) -> Result<(), GpioError> {
        let value = match level {
            Level::High => "1",
            Level::Low => "0",
        };
        fs::write(self.value_path(), value).map_err(|e| self.io_error(e))
    }
}

fn parse_level(terminal: &str, raw: &str) -> Result<Level, GpioError> {
    match raw.trim() {
        "1" => Ok(Level::High),
        "0" => Ok(Level::Low),
        other => Err(GpioError::InvalidLevel {
            terminal: terminal.to_string(),
            value: other.to_string(),
        }),
    }
}

/// Whether a sysfs GPIO tree is present at `root`.
#[must_use]
pub fn sysfs_available(root: &Path) -> bool {
    root.join("export").exists()
}
