//! Bridge configuration
//!
//! One TOML file describes the broker link and the audio streams the
//! binary should open. Libraries take these structs directly; only the
//! binary loads the file.

use serde::{Deserialize, Serialize};
use std::path::Path;

pub use crate::broker::BrokerConfig;
use crate::error::{ConfigError, Error};

/// Which transport binding a stream uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Udp,
    Bus,
}

/// One audio stream definition.
///
/// Zero sample rate, channels or ptime mean "unset" and take the
/// defaults at negotiation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Device descriptor string, e.g. `"ppid=5;port=6000"`
    pub device: String,
    pub transport: TransportKind,
    pub srate: u32,
    pub channels: u16,
    pub ptime_ms: u32,
}

/// Top-level configuration for the bridge binary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub broker: BrokerConfig,
    pub inbound: Vec<StreamConfig>,
    pub outbound: Vec<StreamConfig>,
}

impl BridgeConfig {
    /// Load and parse a TOML config file
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::File(format!("{}: {}", path.display(), e)))?;
        let config = toml::from_str(&text)
            .map_err(|e| ConfigError::File(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }
}
