//! Configuration file support for la66flash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (LA66FLASH_*)
//! 3. Local config file (./la66flash.toml)
//! 4. Global config file (~/.config/la66flash/config.toml)
//!
//! An explicit `--config PATH` replaces both files.

use directories::ProjectDirs;
use la66flash::{GatewayEui, XmodemConfig};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the local configuration file.
pub const LOCAL_CONFIG_FILE: &str = "la66flash.toml";

/// USB device identification for port matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsbDevice {
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
}

impl UsbDevice {
    /// Check if this device matches the given USB info.
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == vid && self.pid == pid
    }
}

/// `[port]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    /// Preferred serial port (e.g., "/dev/ttyACM0" or "COM3").
    pub serial: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
    /// Extra USB devices treated as known bridges.
    #[serde(default)]
    pub usb_device: Vec<UsbDevice>,
}

/// `[xmodem]` section: timing overrides, milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct XmodemSection {
    /// Total time to wait for the bootloader to answer the `C` probe.
    pub handshake_window_ms: Option<u64>,
    /// Wait after each probe burst before sending the next one.
    pub probe_timeout_ms: Option<u64>,
    /// Wait for ACK/NAK after each data block.
    pub block_timeout_ms: Option<u64>,
    /// Transmissions per block before giving up (at least 1).
    pub max_retries: Option<u32>,
    /// Wait for the ACK to EOT.
    pub eot_timeout_ms: Option<u64>,
    /// EOT transmissions before reporting it unconfirmed (at least 1).
    pub eot_retries: Option<u32>,
    /// Pause between EOT attempts.
    pub eot_retry_delay_ms: Option<u64>,
    /// Quiet period that ends an input flush.
    pub flush_timeout_ms: Option<u64>,
}

impl XmodemSection {
    /// Overlay the configured values on `base`.
    pub fn apply(&self, mut base: XmodemConfig) -> XmodemConfig {
        let ms = Duration::from_millis;

        if let Some(v) = self.handshake_window_ms {
            base.handshake_window = ms(v);
        }
        if let Some(v) = self.probe_timeout_ms {
            base.probe_timeout = ms(v);
        }
        if let Some(v) = self.block_timeout_ms {
            base.block_timeout = ms(v);
        }
        if let Some(v) = self.max_retries {
            base.max_retries = v.max(1);
        }
        if let Some(v) = self.eot_timeout_ms {
            base.eot_timeout = ms(v);
        }
        if let Some(v) = self.eot_retries {
            base.eot_retries = v.max(1);
        }
        if let Some(v) = self.eot_retry_delay_ms {
            base.eot_retry_delay = ms(v);
        }
        if let Some(v) = self.flush_timeout_ms {
            base.flush_timeout = ms(v);
        }
        base
    }

    fn merge(&mut self, other: Self) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() { self.$field = other.$field; })*
            };
        }
        take!(
            handshake_window_ms,
            probe_timeout_ms,
            block_timeout_ms,
            max_retries,
            eot_timeout_ms,
            eot_retries,
            eot_retry_delay_ms,
            flush_timeout_ms
        );
    }
}

/// `[bridge]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Network server, `host:port`.
    pub server: Option<String>,
    /// Gateway EUI, 16 hex characters.
    pub eui: Option<String>,
}

impl BridgeConfig {
    /// Parsed EUI, if one is configured.
    pub fn eui(&self) -> Option<la66flash::Result<GatewayEui>> {
        self.eui.as_deref().map(str::parse)
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Port configuration.
    #[serde(default)]
    pub port: PortConfig,
    /// Transfer timing.
    #[serde(default)]
    pub xmodem: XmodemSection,
    /// Gateway forwarding.
    #[serde(default)]
    pub bridge: BridgeConfig,
}

impl Config {
    /// Load configuration from the global and local files.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    ///
    /// Returns `None` if the file does not exist.
    pub fn load_from_path(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        let config = Self::load_from_file(path).unwrap_or_else(|| {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        });
        debug!("Loaded config from {}", path.display());
        Some(config)
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
        ProjectDirs::from("", "", "la66flash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Transfer timing with the `[xmodem]` overrides applied.
    pub fn xmodem_config(&self) -> XmodemConfig {
        self.xmodem.apply(XmodemConfig::default())
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.port.serial.is_some() {
            self.port.serial = other.port.serial;
        }
        if other.port.baud.is_some() {
            self.port.baud = other.port.baud;
        }
        self.port.usb_device.extend(other.port.usb_device);

        self.xmodem.merge(other.xmodem);

        if other.bridge.server.is_some() {
            self.bridge.server = other.bridge.server;
        }
        if other.bridge.eui.is_some() {
            self.bridge.eui = other.bridge.eui;
        }
    }
}
