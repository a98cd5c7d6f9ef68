//! Application configuration
//!
//! Loaded from `config.toml` in the platform config directory. Every
//! section and field has a default, so a partial file is fine and a
//! missing file means "all defaults".

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::discovery::{AnnouncerOptions, ListenerOptions};
use crate::error::{Error, Result};
use crate::network::{PingSchedule, ReceiverOptions, SenderOptions};

const CONFIG_FILE: &str = "config.toml";

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub audio: AudioConfig,
    pub discovery: DiscoveryConfig,
    pub control: ControlConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the receiver binds to
    pub bind_address: IpAddr,
    /// Audio data port; control uses `data_port + 1`
    pub data_port: u16,
    pub discovery_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            data_port: DEFAULT_DATA_PORT,
            discovery_port: DISCOVERY_PORT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// 48000 or 44100
    pub sample_rate: u32,
    /// Jitter buffer prebuffer depth in frames
    pub prebuffer: usize,
    /// Capture device name on the sender; first loopback-capable device if unset
    pub device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            prebuffer: DEFAULT_PREBUFFER,
            device: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub announce_interval_secs: u64,
    /// Recency window for active hosts
    pub active_window_secs: u64,
    /// Silent peers are pruned after this long
    pub retention_secs: u64,
    /// Advertised name; the system host name if unset
    pub hostname: Option<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            announce_interval_secs: ANNOUNCE_INTERVAL.as_secs(),
            active_window_secs: ACTIVE_HOST_WINDOW.as_secs(),
            retention_secs: PEER_RETENTION.as_secs(),
            hostname: None,
        }
    }
}

impl DiscoveryConfig {
    pub fn active_window(&self) -> Duration {
        Duration::from_secs(self.active_window_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub ping_interval_ms: u64,
    pub ping_timeout_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: PING_INTERVAL.as_millis() as u64,
            ping_timeout_ms: PING_TIMEOUT.as_millis() as u64,
        }
    }
}

impl AppConfig {
    /// Parse a TOML document
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load from `path`; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let config = Self::from_toml(&text)?;
                tracing::debug!("Loaded configuration from {}", path.display());
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No configuration at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Load from the platform config directory
    pub fn load_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        config_dir().map(|dir| dir.join(CONFIG_FILE))
    }

    pub fn receiver_options(&self) -> ReceiverOptions {
        ReceiverOptions {
            bind_ip: self.network.bind_address,
            port: self.network.data_port,
            sample_rate: self.audio.sample_rate,
            prebuffer: self.audio.prebuffer,
        }
    }

    pub fn sender_options(&self, destination: IpAddr, device: impl Into<String>) -> SenderOptions {
        let mut options = SenderOptions::new(
            SocketAddr::new(destination, self.network.data_port),
            device,
        );
        options.sample_rate = self.audio.sample_rate;
        options.ping = self.ping_schedule();
        options
    }

    pub fn ping_schedule(&self) -> PingSchedule {
        PingSchedule {
            interval: Duration::from_millis(self.control.ping_interval_ms),
            timeout: Duration::from_millis(self.control.ping_timeout_ms),
        }
    }

    pub fn announcer_options(&self) -> AnnouncerOptions {
        let mut options = AnnouncerOptions {
            interval: Duration::from_secs(self.discovery.announce_interval_secs),
            ..Default::default()
        };
        options.target.set_port(self.network.discovery_port);
        if let Some(hostname) = &self.discovery.hostname {
            options.hostname = hostname.clone();
        }
        options
    }

    pub fn listener_options(&self) -> ListenerOptions {
        ListenerOptions {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: self.network.discovery_port,
            retention: Duration::from_secs(self.discovery.retention_secs),
        }
    }
}

/// Per-user config directory of the application
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "lan-audio-link")
        .map(|dirs| dirs.config_dir().to_path_buf())
}
