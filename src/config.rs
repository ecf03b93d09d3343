//! Configuration for instrument sessions using Figment
//!
//! Configuration is loaded from:
//! 1. A TOML file (base configuration, every field optional)
//! 2. Environment variables prefixed with `INSTRUMENT_LINK_`
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! INSTRUMENT_LINK_LOG_LEVEL=debug
//! INSTRUMENT_LINK_LINE__BAUD_RATE=115200
//! INSTRUMENT_LINK_FRAMING__HANDLE_POLICY=keep_open
//! ```
//!
//! ```toml
//! log_level = "info"
//!
//! [line]
//! baud_rate = 9600
//! read_timeout = "1s"
//!
//! [framing]
//! poll_interval = "20ms"
//! query_wait = "1s"
//! scpi_scan_settle = "5s"
//!
//! [discovery]
//! vendor_fingerprint = "SANTEC"
//! family_prefix = "TSL"
//! ```

use crate::error::{LinkError, LinkResult};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "INSTRUMENT_LINK_";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Serial line characteristics applied when a handle is opened
    pub line: LineSettings,
    /// Response framing and timing
    pub framing: FramingSettings,
    /// Device selection
    pub discovery: DiscoverySettings,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            line: LineSettings::default(),
            framing: FramingSettings::default(),
            discovery: DiscoverySettings::default(),
        }
    }
}

/// Parity modes for the serial line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    /// No parity bit
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

/// Flow control modes for the serial line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowControl {
    /// No handshaking
    None,
    /// RTS/CTS hardware handshaking
    RtsCts,
    /// DTR/DSR hardware handshaking
    DtrDsr,
    /// XON/XOFF software handshaking
    XonXoff,
}

/// Serial line characteristics, applied by [`crate::transport::Transport::configure`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineSettings {
    /// Baud rate
    pub baud_rate: u32,
    /// Word length (7 or 8)
    pub data_bits: u8,
    /// Stop bits (1 or 2)
    pub stop_bits: u8,
    /// Parity
    pub parity: Parity,
    /// Flow control
    pub flow_control: FlowControl,
    /// XON character for software flow control
    pub xon: u8,
    /// XOFF character for software flow control
    pub xoff: u8,
    /// Driver-level read timeout
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    /// Driver-level write timeout
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,
    /// Bit mode pin mask
    pub bit_mode_mask: u8,
    /// Bit mode selector
    pub bit_mode_enable: u8,
}

impl Default for LineSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
            flow_control: FlowControl::None,
            xon: 0x11,
            xoff: 0x13,
            read_timeout: Duration::from_millis(1000),
            write_timeout: Duration::from_millis(1000),
            bit_mode_mask: 0x00,
            bit_mode_enable: 0x40,
        }
    }
}

/// What the session does with its handle once a response frame has been read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlePolicy {
    /// Close after every read; the next operation reopens lazily.
    #[default]
    ReleaseAfterRead,
    /// Hold the handle until `close()` or drop.
    KeepOpen,
}

/// Response framing and timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FramingSettings {
    /// Sleep between queue status polls
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Minimum pause after every write
    #[serde(with = "humantime_serde")]
    pub post_write_delay: Duration,
    /// Idle budget for ordinary queries
    #[serde(with = "humantime_serde")]
    pub query_wait: Duration,
    /// Idle budget for bulk scan reads
    #[serde(with = "humantime_serde")]
    pub scan_read_wait: Duration,
    /// Pause between requesting SCPI scan data and reading it
    #[serde(with = "humantime_serde")]
    pub scpi_scan_settle: Duration,
    /// Handle lifecycle after reads
    pub handle_policy: HandlePolicy,
}

impl Default for FramingSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(20),
            post_write_delay: Duration::from_millis(20),
            query_wait: Duration::from_secs(1),
            scan_read_wait: Duration::from_secs(1),
            scpi_scan_settle: Duration::from_secs(5),
            handle_policy: HandlePolicy::ReleaseAfterRead,
        }
    }
}

/// Device selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    /// Manufacturer string a bridge must report to be a candidate
    pub vendor_fingerprint: String,
    /// Description prefix used when no serial number is given
    pub family_prefix: String,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            vendor_fingerprint: "SANTEC".to_string(),
            family_prefix: "TSL".to_string(),
        }
    }
}

impl LinkConfig {
    /// Load configuration from a TOML file plus environment overrides.
    ///
    /// A missing file is not an error; defaults fill every absent field.
    /// Precedence (highest first): environment, file, defaults.
    pub fn load_from<P: AsRef<Path>>(path: P) -> LinkResult<Self> {
        Self::figment(
            Figment::from(Serialized::defaults(LinkConfig::default()))
                .merge(Toml::file(path.as_ref())),
        )
    }

    /// Load defaults plus environment overrides only.
    pub fn from_env() -> LinkResult<Self> {
        Self::figment(Figment::from(Serialized::defaults(LinkConfig::default())))
    }

    fn figment(base: Figment) -> LinkResult<Self> {
        let config: Self = base
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks log level, word length, stop bits, non-zero baud rate and poll interval,
    /// and that the discovery strings are usable.
    pub fn validate(&self) -> LinkResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(LinkError::ConfigValidation(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.line.baud_rate == 0 {
            return Err(LinkError::ConfigValidation(
                "baud_rate must be greater than zero".to_string(),
            ));
        }

        if !matches!(self.line.data_bits, 7 | 8) {
            return Err(LinkError::ConfigValidation(format!(
                "Invalid data_bits {}. Must be 7 or 8",
                self.line.data_bits
            )));
        }

        if !matches!(self.line.stop_bits, 1 | 2) {
            return Err(LinkError::ConfigValidation(format!(
                "Invalid stop_bits {}. Must be 1 or 2",
                self.line.stop_bits
            )));
        }

        if self.line.flow_control == FlowControl::XonXoff && self.line.xon == self.line.xoff {
            return Err(LinkError::ConfigValidation(format!(
                "xon and xoff must differ for software flow control (both 0x{:02X})",
                self.line.xon
            )));
        }

        if self.framing.poll_interval.is_zero() {
            return Err(LinkError::ConfigValidation(
                "poll_interval must be greater than zero".to_string(),
            ));
        }

        if self.discovery.vendor_fingerprint.trim().is_empty() {
            return Err(LinkError::ConfigValidation(
                "vendor_fingerprint cannot be empty".to_string(),
            ));
        }

        if !self.discovery.family_prefix.is_ascii() {
            return Err(LinkError::ConfigValidation(format!(
                "family_prefix '{}' must be ASCII",
                self.discovery.family_prefix
            )));
        }

        Ok(())
    }
}
