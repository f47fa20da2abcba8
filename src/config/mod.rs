//! # Configuration
//!
//! TOML configuration for the ingestion daemon. Every section and every field has a
//! default, so an empty file is a valid (single `/dev/ttyUSB0` device) configuration.
//!
//! - [`DeviceConfig`] - one entry per attached radio (`[[devices]]`)
//! - [`FramingConfig`] - frame trailer check and payload limit
//! - [`IngestConfig`] - dedup window and stats logging
//! - [`RegistryConfig`] - staleness TTL and the node cache file
//! - [`LinkConfig`] - reconnect backoff, timeouts and the config handshake
//! - [`ServerConfig`] - TCP streaming endpoint and per-client limits
//! - [`LoggingConfig`] - log level and optional log file
//!
//! ```toml
//! [[devices]]
//! name = "radio0"
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//!
//! [registry]
//! ttl_secs = 7200
//! cache_file = "data/node_cache.json"
//!
//! [server]
//! listen = "0.0.0.0:4403"
//! queue_depth = 256
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;

use crate::error::MeshtapError;
use crate::link::LinkSettings;
use crate::meshtastic::framer::{self, FrameCheck};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_devices")]
    pub devices: Vec<DeviceConfig>,
    #[serde(default)]
    pub framing: FramingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_devices() -> Vec<DeviceConfig> {
    vec![DeviceConfig::default()]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            devices: default_devices(),
            framing: FramingConfig::default(),
            ingest: IngestConfig::default(),
            registry: RegistryConfig::default(),
            link: LinkConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Label attached to every event from this device.
    pub name: String,
    pub port: String,
    pub baud_rate: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "radio0".to_string(),
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FramingConfig {
    /// `"none"` (stock firmware), `"protobuf"` (stock firmware, payload must decode
    /// as `FromRadio`) or `"crc16"`.
    pub checksum: String,
    pub max_payload: usize,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            checksum: "none".to_string(),
            max_payload: framer::DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl FramingConfig {
    pub fn check(&self) -> Result<Arc<dyn FrameCheck>, MeshtapError> {
        framer::check_from_name(&self.checksum).ok_or_else(|| {
            MeshtapError::Config(format!(
                "framing.checksum must be \"none\", \"protobuf\" or \"crc16\", got \"{}\"",
                self.checksum
            ))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub dedup_window: usize,
    /// Seconds between metrics log lines; 0 disables them.
    pub stats_interval_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            dedup_window: crate::meshtastic::interpreter::DEFAULT_DEDUP_WINDOW,
            stats_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub ttl_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_file: Option<String>,
    pub save_interval_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 2 * 60 * 60,
            cache_file: Some("data/node_cache.json".to_string()),
            save_interval_secs: 300,
        }
    }
}

impl RegistryConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub backoff_min_ms: u64,
    pub backoff_max_ms: u64,
    pub read_timeout_ms: u64,
    pub idle_timeout_secs: u64,
    pub stable_after_secs: u64,
    /// Send `want_config` after opening so the firmware starts streaming.
    pub want_config: bool,
    /// 0 disables heartbeats.
    pub heartbeat_secs: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            backoff_min_ms: 500,
            backoff_max_ms: 30_000,
            read_timeout_ms: 250,
            idle_timeout_secs: 300,
            stable_after_secs: 30,
            want_config: true,
            heartbeat_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
    pub queue_depth: usize,
    pub send_snapshot: bool,
    pub write_timeout_ms: u64,
    /// Disconnect a client after this many events were dropped for it; 0 = never.
    pub max_client_drops: u64,
    /// 0 = unlimited.
    pub max_clients: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:4403".to_string(),
            queue_depth: 256,
            send_snapshot: true,
            write_timeout_ms: 5000,
            max_client_drops: 1024,
            max_clients: 64,
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> Result<SocketAddr, MeshtapError> {
        self.listen.parse().map_err(|e| {
            MeshtapError::Config(format!("server.listen '{}' is invalid: {}", self.listen, e))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Reject configurations that cannot start.
    pub fn validate(&self) -> Result<(), MeshtapError> {
        let bad = |msg: String| -> Result<(), MeshtapError> { Err(MeshtapError::Config(msg)) };
        if self.devices.is_empty() {
            return bad("at least one [[devices]] entry is required".into());
        }
        let mut names = std::collections::HashSet::new();
        for d in &self.devices {
            if d.port.trim().is_empty() {
                return bad(format!("device '{}' has an empty port", d.name));
            }
            if d.baud_rate == 0 {
                return bad(format!("device '{}' has baud_rate 0", d.name));
            }
            if !names.insert(d.name.as_str()) {
                return bad(format!("duplicate device name '{}'", d.name));
            }
        }
        self.framing.check()?;
        if self.framing.max_payload == 0 || self.framing.max_payload > u16::MAX as usize {
            return bad(format!(
                "framing.max_payload must be 1..=65535, got {}",
                self.framing.max_payload
            ));
        }
        if self.ingest.dedup_window == 0 {
            return bad("ingest.dedup_window must be > 0".into());
        }
        if self.link.backoff_min_ms == 0 {
            return bad("link.backoff_min_ms must be > 0".into());
        }
        if self.link.backoff_min_ms > self.link.backoff_max_ms {
            return bad(format!(
                "link.backoff_min_ms ({}) exceeds link.backoff_max_ms ({})",
                self.link.backoff_min_ms, self.link.backoff_max_ms
            ));
        }
        if self.link.read_timeout_ms == 0 || self.link.idle_timeout_secs == 0 {
            return bad("link read and idle timeouts must be > 0".into());
        }
        if self.server.queue_depth == 0 {
            return bad("server.queue_depth must be > 0".into());
        }
        self.server.listen_addr()?;
        Ok(())
    }

    /// Per-device supervisor settings derived from `[link]` and `[framing]`.
    pub fn link_settings(&self) -> Result<LinkSettings, MeshtapError> {
        let l = &self.link;
        Ok(LinkSettings {
            backoff_min: Duration::from_millis(l.backoff_min_ms),
            backoff_max: Duration::from_millis(l.backoff_max_ms),
            idle_timeout: Duration::from_secs(l.idle_timeout_secs),
            stable_after: Duration::from_secs(l.stable_after_secs),
            want_config: l.want_config,
            heartbeat: (l.heartbeat_secs > 0).then(|| Duration::from_secs(l.heartbeat_secs)),
            max_payload: self.framing.max_payload,
            check: self.framing.check()?,
        })
    }
}
