//! # Configuration Management
//!
//! Wire constants and runtime configuration for the fragmentation layer.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()`
//!
//! ## Wire Constants
//! The constants in this module define the datagram format and must match on
//! both ends of a conversation. Only the fragment size and the directory page
//! size are tunable per process.

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Magic marker opening every multi-packet datagram
pub const MAGIC_BYTES: [u8; 8] = *b"MaGic6.0";

/// Size of the fixed long-format header (magic through encryption key-id length)
pub const HEADER_SIZE: usize = 31;

/// Size of the MAC block carried by authenticated packets
pub const MAC_SIZE: usize = 16;

/// Tag that opens the security prefix of a legacy single-packet datagram
pub const SECURITY_TAG: [u8; 4] = *b"CRAP";

/// Security tag plus flags, MAC key-id length and encryption key-id length
pub const SHORT_SECURITY_HEADER_SIZE: usize = 10;

/// Largest datagram the transport will carry
pub const MAX_DATAGRAM_SIZE: usize = 60_000;

/// Default fragment (datagram) size
pub const DEFAULT_FRAGMENT_SIZE: usize = 1_000;

/// Payload bytes available in a default-sized packet before security reservations
pub const USABLE_PACKET_SIZE: usize = DEFAULT_FRAGMENT_SIZE - HEADER_SIZE;

/// Default number of packet slots per directory page
pub const DEFAULT_PAGE_SLOTS: usize = 41;

/// Largest number of packets one message may be split into (16-bit sequence numbers)
pub const MAX_PACKETS_PER_MESSAGE: usize = u16::MAX as usize + 1;

/// Default cap on the size of a reassembled message
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Smallest fragment size that still leaves room for one payload byte
pub const MIN_FRAGMENT_SIZE: usize = HEADER_SIZE + 1;

/// Largest fragment size accepted by `set_fragment_size`
pub const MAX_FRAGMENT_SIZE: usize = MAX_DATAGRAM_SIZE - HEADER_SIZE - 1;

/// Clamp a requested fragment size into the supported range.
/// Zero selects the default.
pub fn clamp_fragment_size(requested: usize) -> usize {
    if requested == 0 {
        return DEFAULT_FRAGMENT_SIZE;
    }
    requested.clamp(MIN_FRAGMENT_SIZE, MAX_FRAGMENT_SIZE)
}

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Outgoing fragmentation settings
    #[serde(default)]
    pub fragment: FragmentConfig,

    /// Incoming reassembly settings
    #[serde(default)]
    pub reassembly: ReassemblyConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(size) = std::env::var("SAFE_DATAGRAM_FRAGMENT_SIZE") {
            config.fragment.fragment_size = size.parse::<usize>().map_err(|e| {
                ProtocolError::ConfigError(format!("Invalid SAFE_DATAGRAM_FRAGMENT_SIZE: {e}"))
            })?;
        }

        if let Ok(slots) = std::env::var("SAFE_DATAGRAM_PAGE_SLOTS") {
            config.reassembly.page_slots = slots.parse::<usize>().map_err(|e| {
                ProtocolError::ConfigError(format!("Invalid SAFE_DATAGRAM_PAGE_SLOTS: {e}"))
            })?;
        }

        if let Ok(limit) = std::env::var("SAFE_DATAGRAM_MAX_MESSAGE_SIZE") {
            config.reassembly.max_message_size = limit.parse::<usize>().map_err(|e| {
                ProtocolError::ConfigError(format!("Invalid SAFE_DATAGRAM_MAX_MESSAGE_SIZE: {e}"))
            })?;
        }

        if let Ok(timeout) = std::env::var("SAFE_DATAGRAM_STALE_TIMEOUT_MS") {
            let millis = timeout.parse::<u64>().map_err(|e| {
                ProtocolError::ConfigError(format!("Invalid SAFE_DATAGRAM_STALE_TIMEOUT_MS: {e}"))
            })?;
            config.reassembly.stale_timeout = Duration::from_millis(millis);
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.fragment.validate());
        errors.extend(self.reassembly.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Outgoing fragmentation configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FragmentConfig {
    /// Datagram size used when splitting a message (header included)
    pub fragment_size: usize,
}

impl Default for FragmentConfig {
    fn default() -> Self {
        Self {
            fragment_size: DEFAULT_FRAGMENT_SIZE,
        }
    }
}

impl FragmentConfig {
    /// Payload capacity of one packet before any security reservation
    pub fn usable_packet_size(&self) -> usize {
        clamp_fragment_size(self.fragment_size) - HEADER_SIZE
    }

    /// Validate fragmentation configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.fragment_size < MIN_FRAGMENT_SIZE {
            errors.push(format!(
                "Fragment size too small: {} (minimum: {MIN_FRAGMENT_SIZE})",
                self.fragment_size
            ));
        } else if self.fragment_size > MAX_FRAGMENT_SIZE {
            errors.push(format!(
                "Fragment size too large: {} (maximum: {MAX_FRAGMENT_SIZE})",
                self.fragment_size
            ));
        }

        errors
    }
}

/// Incoming reassembly configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReassemblyConfig {
    /// Number of packet slots in one directory page
    pub page_slots: usize,

    /// Largest reassembled message accepted, in bytes
    pub max_message_size: usize,

    /// Age after which the owning message table may evict a stalled message
    #[serde(with = "duration_serde")]
    pub stale_timeout: Duration,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            page_slots: DEFAULT_PAGE_SLOTS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            stale_timeout: Duration::from_secs(20),
        }
    }
}

impl ReassemblyConfig {
    /// Validate reassembly configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.page_slots == 0 {
            errors.push("Page slots must be greater than 0".to_string());
        } else if self.page_slots > MAX_PACKETS_PER_MESSAGE {
            errors.push(format!(
                "Page slots too large: {} (maximum: {MAX_PACKETS_PER_MESSAGE})",
                self.page_slots
            ));
        }

        if self.max_message_size == 0 {
            errors.push("Max message size cannot be 0".to_string());
        }

        if self.stale_timeout.as_millis() < 100 {
            errors.push("Stale timeout too short (minimum: 100ms)".to_string());
        } else if self.stale_timeout.as_secs() > 3600 {
            errors.push("Stale timeout too long (maximum: 1 hour)".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("safe-datagram"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
