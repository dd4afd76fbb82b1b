//! Configuration management for prism-driver.
//!
//! This module handles loading configuration from TOML files. Every field
//! has a default, so an empty file (or no file at all) yields the stock
//! pin mapping and protocol timing.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::tracing::prelude::*;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "PRISM_CONFIG";

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/prism/prism.toml";

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Device addressing and wiring
    pub device: DeviceConfig,

    /// Protocol timing
    pub timing: Timing,
}

/// Device addressing and wiring.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// 7-bit I2C address, 1..=127
    pub address: u8,

    /// Initialize the I2C bus before talking to the device
    pub init_bus: bool,

    /// Parallel bus wiring; the default mapping when absent
    pub pins: Option<PinConfig>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: 0x20,
            init_bus: true,
            pins: None,
        }
    }
}

/// GPIO assignment of the ten parallel bus lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct PinConfig {
    /// Data bits 0..=3
    pub low: [u8; 4],

    /// Clock; the receiver samples on its falling edge
    pub clock: u8,

    /// Entry flag, high for the first byte of each 32-bit word
    pub entry: u8,

    /// Data bits 4..=7
    pub high: [u8; 4],
}

impl Default for PinConfig {
    /// Arduino header mapping: D2-D5 low nibble, D6 clock, D7 entry flag,
    /// D8-D11 high nibble.
    fn default() -> Self {
        Self {
            low: [2, 3, 4, 5],
            clock: 6,
            entry: 7,
            high: [8, 9, 10, 11],
        }
    }
}

impl PinConfig {
    /// Data lines in bit order, bit 0 first.
    pub fn data_pins(&self) -> [u8; 8] {
        let [l0, l1, l2, l3] = self.low;
        let [h0, h1, h2, h3] = self.high;
        [l0, l1, l2, l3, h0, h1, h2, h3]
    }

    /// All ten lines, data first.
    pub fn all_pins(&self) -> [u8; 10] {
        let d = self.data_pins();
        [d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7], self.clock, self.entry]
    }

    /// Reject wiring that assigns one GPIO to two roles.
    pub fn validate(&self) -> anyhow::Result<()> {
        let pins = self.all_pins();
        for (i, pin) in pins.iter().enumerate() {
            if pins[i + 1..].contains(pin) {
                anyhow::bail!("GPIO {} assigned to more than one bus line", pin);
            }
        }
        Ok(())
    }
}

/// Protocol timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Timing {
    /// Data valid before the clock falls (us)
    pub setup_us: u32,

    /// Hold after the falling edge when sending (us)
    pub send_hold_us: u32,

    /// Wait after the falling edge before sampling (us)
    pub recv_hold_us: u32,

    /// Device processing time after a command write (ms)
    pub settle_ms: u32,

    /// Interval between acknowledgement reads (ms)
    pub poll_interval_ms: u32,

    /// Bus stabilization after init (ms)
    pub bus_settle_ms: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            setup_us: 2,
            send_hold_us: 4,
            recv_hold_us: 2,
            settle_ms: 50,
            poll_interval_ms: 5,
            bus_settle_ms: 100,
        }
    }
}

impl Config {
    /// Load configuration from `$PRISM_CONFIG`, else the default location,
    /// else built-in defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

        if path.exists() {
            Self::load_from(&path)
        } else {
            debug!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config = Self::parse(&text)
            .with_context(|| format!("parsing {}", path.display()))?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(text)?;
        if let Some(pins) = &config.device.pins {
            pins.validate()?;
        }
        Ok(config)
    }
}
