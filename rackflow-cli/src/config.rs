//! Configuration file support for rackflow.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (RACKFLOW_*)
//! 3. Local config file (./rackflow.toml)
//! 4. Global config file (~/.config/rackflow/config.toml)

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Engine tuning knobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Port poll interval in milliseconds.
    pub poll_ms: Option<u64>,
    /// Settling delay after fire-and-forget commands, in milliseconds.
    pub settle_ms: Option<u64>,
}

impl EngineConfig {
    /// Poll interval as a `Duration`, if configured.
    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_ms
            .map(Duration::from_millis)
    }

    /// Settling delay as a `Duration`, if configured.
    pub fn settle(&self) -> Option<Duration> {
        self.settle_ms
            .map(Duration::from_millis)
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Engine settings.
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                if let Some(global_config) = Self::load_from_file(&global_path) {
                    debug!("Loaded global config from {}", global_path.display());
                    config.merge(global_config);
                }
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new("rackflow.toml")) {
            debug!("Loaded local config from rackflow.toml");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse TOML config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "rackflow").map(|dirs| {
            dirs.config_dir()
                .to_path_buf()
        })
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other
            .connection
            .port
            .is_some()
        {
            self.connection
                .port = other
                .connection
                .port;
        }
        if other
            .connection
            .baud
            .is_some()
        {
            self.connection
                .baud = other
                .connection
                .baud;
        }
        if other
            .engine
            .poll_ms
            .is_some()
        {
            self.engine
                .poll_ms = other
                .engine
                .poll_ms;
        }
        if other
            .engine
            .settle_ms
            .is_some()
        {
            self.engine
                .settle_ms = other
                .engine
                .settle_ms;
        }
    }
}
