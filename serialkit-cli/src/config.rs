//! Configuration file support for serialkit.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (SERIALKIT_*)
//! 3. Local config file (./serialkit.toml)
//! 4. Global config file (~/.config/serialkit/config.toml)
//!
//! ```toml
//! [port]
//! name = "/dev/ttyUSB0"
//! baud = 115200
//! parity = "even"
//! data_bits = 7
//! stop_bits = "two"
//! dtr = "disable"
//!
//! [line]
//! newline = "\n"
//! read_timeout_ms = 2000
//! poll_interval_ms = 5
//! ```

use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serialkit::{DataBits, DtrControl, Parity, StopBits};
use std::fs;
use std::path::{Path, PathBuf};

/// Local configuration file name.
pub const LOCAL_CONFIG: &str = "serialkit.toml";

/// Serial line settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortSection {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub name: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
    /// Parity mode.
    pub parity: Option<Parity>,
    /// Data bits per character.
    pub data_bits: Option<DataBits>,
    /// Stop bits.
    pub stop_bits: Option<StopBits>,
    /// DTR line behaviour.
    pub dtr: Option<DtrControl>,
}

/// Line reading and polling settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LineSection {
    /// Terminator for `read-line` and `send --newline`.
    pub newline: Option<String>,
    /// Default `read-line` timeout.
    pub read_timeout_ms: Option<u64>,
    /// Sleep between receive-queue samples in `monitor`.
    pub poll_interval_ms: Option<u64>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Serial line settings.
    #[serde(default)]
    pub port: PortSection,
    /// Line reading settings.
    #[serde(default)]
    pub line: LineSection,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
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
                    warn!("Failed to parse config file {}: {}", path.display(), e);
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
        ProjectDirs::from("", "", "serialkit").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        let port = other.port;
        if port.name.is_some() {
            self.port.name = port.name;
        }
        if port.baud.is_some() {
            self.port.baud = port.baud;
        }
        if port.parity.is_some() {
            self.port.parity = port.parity;
        }
        if port.data_bits.is_some() {
            self.port.data_bits = port.data_bits;
        }
        if port.stop_bits.is_some() {
            self.port.stop_bits = port.stop_bits;
        }
        if port.dtr.is_some() {
            self.port.dtr = port.dtr;
        }

        let line = other.line;
        if line.newline.is_some() {
            self.line.newline = line.newline;
        }
        if line.read_timeout_ms.is_some() {
            self.line.read_timeout_ms = line.read_timeout_ms;
        }
        if line.poll_interval_ms.is_some() {
            self.line.poll_interval_ms = line.poll_interval_ms;
        }
    }

    /// Remember `name` as the preferred port.
    ///
    /// Written to the local file when one exists, otherwise to the global
    /// one. Only the `port.name` key of the target file changes.
    pub fn remember_port(&mut self, name: &str) -> anyhow::Result<()> {
        let path = if Path::new(LOCAL_CONFIG).exists() {
            PathBuf::from(LOCAL_CONFIG)
        } else if let Some(global_dir) = Self::global_config_dir() {
            fs::create_dir_all(&global_dir)?;
            global_dir.join("config.toml")
        } else {
            PathBuf::from(LOCAL_CONFIG)
        };

        Self::save_port_name(&path, name)?;
        self.port.name = Some(name.to_string());
        info!("Saved port {name} to {}", path.display());
        Ok(())
    }

    fn save_port_name(path: &Path, name: &str) -> anyhow::Result<()> {
        let mut file_config = Self::load_from_file(path).unwrap_or_default();
        file_config.port.name = Some(name.to_string());
        fs::write(path, toml::to_string_pretty(&file_config)?)?;
        Ok(())
    }
}
