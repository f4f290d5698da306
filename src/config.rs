//! Board file parsing
//!
//! A board file describes how a card is wired and how patient the driver
//! should be with it:
//!
//! ```toml
//! [spi]
//! device = "/dev/spidev0.0"
//! speed_khz = 12000
//!
//! [gpio]
//! chip = "/dev/gpiochip0"
//! cs = 8
//! irq = 25
//! reset = "0x18"
//! dummy_writes = false
//!
//! [timing]
//! wait_timeout_ms = 5000
//! helper_chunk_delay_ms = 10
//!
//! [firmware]
//! dir = "/lib/firmware"
//! ```
//!
//! Every entry is optional. Numbers may be written as integers or as hex or
//! decimal strings.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use libertas_spi_core::SpuTiming;
use thiserror::Error;

/// Board file errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("Failed to read board file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML or has unexpected entries
    #[error("Invalid board file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Parsed board file
#[derive(Debug, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoardFile {
    #[serde(default)]
    spi: SpiSection,
    #[serde(default)]
    gpio: GpioSection,
    #[serde(default)]
    timing: TimingSection,
    #[serde(default)]
    firmware: FirmwareSection,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct SpiSection {
    device: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_number")]
    speed_khz: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_opt_number")]
    mode: Option<u64>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct GpioSection {
    chip: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_number")]
    cs: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_opt_number")]
    irq: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_opt_number")]
    reset: Option<u64>,
    dummy_writes: Option<bool>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct TimingSection {
    #[serde(default, deserialize_with = "deserialize_opt_number")]
    guard_delay_ns: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_opt_number")]
    tick_ms: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_opt_number")]
    poll_interval_us: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_opt_number")]
    wait_timeout_ms: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_opt_number")]
    confirm_interval_ms: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_opt_number")]
    helper_chunk_delay_ms: Option<u64>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct FirmwareSection {
    dir: Option<PathBuf>,
}

/// Deserialize an optional integer that can be hex (0x...) or decimal
fn deserialize_opt_number<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum HexOrInt {
        Int(u64),
        Str(String),
    }

    match HexOrInt::deserialize(deserializer)? {
        HexOrInt::Int(n) => Ok(Some(n)),
        HexOrInt::Str(s) => parse_number(&s).map(Some).map_err(serde::de::Error::custom),
    }
}

/// Parse a number that can be hex (0x...) or decimal
pub fn parse_number(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).map_err(|e| format!("invalid hex: {}", e))
    } else {
        s.parse().map_err(|e| format!("invalid number: {}", e))
    }
}

impl BoardFile {
    /// Load a board file from disk
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let board = Self::from_toml_str(&content)?;
        log::debug!("Loaded board file {}", path.display());
        Ok(board)
    }

    /// Parse a board file
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Backend options described by the file, as `key=value` pairs
    ///
    /// Options given on the command line are appended after these and win.
    pub fn backend_options(&self) -> Vec<(String, String)> {
        let mut options = Vec::new();
        let mut push = |key: &str, value: Option<String>| {
            if let Some(value) = value {
                options.push((key.to_string(), value));
            }
        };
        push("dev", self.spi.device.clone());
        push("spispeed", self.spi.speed_khz.map(|v| v.to_string()));
        push("mode", self.spi.mode.map(|v| v.to_string()));
        push("gpiochip", self.gpio.chip.clone());
        push("cs", self.gpio.cs.map(|v| v.to_string()));
        push("irq", self.gpio.irq.map(|v| v.to_string()));
        push("reset", self.gpio.reset.map(|v| v.to_string()));
        push(
            "dummy_writes",
            self.gpio.dummy_writes.map(|v| if v { "yes" } else { "no" }.to_string()),
        );
        options
    }

    /// Driver timing with the file's overrides applied
    pub fn timing(&self) -> SpuTiming {
        let t = &self.timing;
        let mut timing = SpuTiming::default();
        if let Some(ns) = t.guard_delay_ns {
            timing.guard_delay = Duration::from_nanos(ns);
        }
        if let Some(ms) = t.tick_ms {
            timing.tick = Duration::from_millis(ms);
        }
        if let Some(us) = t.poll_interval_us {
            timing.poll_interval = Duration::from_micros(us);
        }
        if let Some(ms) = t.wait_timeout_ms {
            timing.wait_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = t.confirm_interval_ms {
            timing.confirm_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = t.helper_chunk_delay_ms {
            timing.helper_chunk_delay = Duration::from_millis(ms);
        }
        timing
    }

    /// Firmware directory, if the file names one
    pub fn firmware_dir(&self) -> Option<&Path> {
        self.firmware.dir.as_deref()
    }
}
