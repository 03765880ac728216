// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Daemon configuration: serial device, socket bind address, and capacity
//! knobs, loadable from a JSON file and overlaid by CLI flags.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Serial device the receiver is attached to.
    #[serde(default = "default_serial")]
    pub serial: String,

    /// `host:port` to bind a TCP client listener on, if any.
    #[serde(default)]
    pub bind: Option<String>,

    /// UNIX-domain socket path to listen on, if any.
    #[serde(default)]
    pub socket: Option<PathBuf>,

    /// Maximum simultaneous client connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Optional file to mirror log output into, in addition to stdout.
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Detach into the background after startup.
    #[serde(default)]
    pub daemon: bool,
}

fn default_serial() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_max_connections() -> usize {
    200
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            serial: default_serial(),
            bind: None,
            socket: None,
            max_connections: default_max_connections(),
            log_file: None,
            daemon: false,
        }
    }
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("max_connections cannot be 0".into()));
        }
        if self.bind.is_none() && self.socket.is_none() {
            return Err(ConfigError::InvalidValue(
                "at least one of bind or socket must be set".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    Serialize(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "I/O error: {s}"),
            ConfigError::Parse(s) => write!(f, "parse error: {s}"),
            ConfigError::Serialize(s) => write!(f, "serialize error: {s}"),
            ConfigError::InvalidValue(s) => write!(f, "invalid value: {s}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_serial_and_capacity() {
        let config = DaemonConfig::default();
        assert_eq!(config.serial, "/dev/ttyUSB0");
        assert_eq!(config.max_connections, 200);
    }

    #[test]
    fn validate_rejects_zero_max_connections() {
        let config = DaemonConfig {
            max_connections: 0,
            bind: Some("127.0.0.1:8701".into()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_requires_a_listener() {
        let config = DaemonConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn round_trips_through_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("onkyoctld.json");
        let config = DaemonConfig {
            bind: Some("0.0.0.0:8701".into()),
            ..Default::default()
        };
        config.to_file(&path).unwrap();
        let loaded = DaemonConfig::from_file(&path).unwrap();
        assert_eq!(loaded.bind, config.bind);
        assert_eq!(loaded.max_connections, config.max_connections);
    }
}
