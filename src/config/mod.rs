//! Configuration loading and management
//!
//! The config document is YAML with two top-level sections:
//!
//! ```yaml
//! ble:
//!   device_name: IR Blaster
//! events:
//!   OnConnect: On
//!   Idle: { NamedCommand: Green, Delay: 120 }
//! ```
//!
//! Any missing section or field falls back to its default.

mod events;

use std::path::{Path, PathBuf};

use serde_yaml::Value;
use tracing::{info, warn};

pub use events::{CommandSpec, EventsConfig};

/// Advertised-name fragment matched when scanning for the blaster
pub const DEFAULT_DEVICE_NAME: &str = "IR Blaster";

/// Config file looked up in the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Errors raised while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("{section} must be a mapping, got {value}")]
    InvalidSection { section: &'static str, value: String },

    #[error("events.{category}: {field} must be a non-negative integer, got {value}")]
    InvalidNumber {
        category: &'static str,
        field: &'static str,
        value: String,
    },

    #[error("events.{category}: NamedCommand must be a string, got {value}")]
    InvalidName { category: &'static str, value: String },

    #[error("events.{category}: unsupported entry {value}")]
    InvalidEntry { category: &'static str, value: String },
}

/// Bluetooth link settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BleConfig {
    /// Case-insensitive fragment of the blaster's advertised name
    pub device_name: String,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            device_name: DEFAULT_DEVICE_NAME.to_string(),
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub ble: BleConfig,
    pub events: EventsConfig,
}

impl Config {
    /// Load configuration from `path`, or from `config.yaml` in the working
    /// directory when no path is given.
    ///
    /// A missing default file yields the built-in defaults; a missing
    /// explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !path.is_file() {
                    warn!(?path, "config file not found, using defaults");
                    return Ok(Self::default());
                }
                path
            }
        };

        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config = Self::from_yaml_str(&text)?;
        info!(?path, "configuration file read");
        Ok(config)
    }

    /// Parse a YAML document, applying defaults for anything absent
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let doc: Value = serde_yaml::from_str(text)?;
        Self::from_value(&doc)
    }

    fn from_value(doc: &Value) -> Result<Self, ConfigError> {
        if !doc.is_null() && !doc.is_mapping() {
            return Err(ConfigError::InvalidSection {
                section: "config",
                value: "a non-mapping document".to_string(),
            });
        }

        let device_name = doc
            .get("ble")
            .and_then(|ble| ble.get("device_name"))
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_DEVICE_NAME)
            .to_string();

        Ok(Self {
            ble: BleConfig { device_name },
            events: EventsConfig::from_value(doc.get("events"))?,
        })
    }
}
