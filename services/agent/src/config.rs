//! Agent configuration
//!
//! A TOML file with CLI overrides. Buffer capacity is given as a
//! power-of-two exponent; checkpoint frequency must divide the capacity.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{AgentError, Result};

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_buffer_size() -> u32 {
    17
}

fn default_checkpoint_frequency() -> u64 {
    1000
}

fn default_max_assets() -> usize {
    1024
}

fn default_idle_timeout_ms() -> u64 {
    30_000
}

fn default_heartbeat_ms() -> u64 {
    10_000
}

fn default_shdr_port() -> u16 {
    7878
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_reconnect_interval_ms() -> u64 {
    10_000
}

fn default_legacy_timeout_ms() -> u64 {
    600_000
}

fn default_mqtt_reconnect_ms() -> u64 {
    5_000
}

/// Top-level agent configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// REST bind address
    #[serde(default = "default_bind")]
    pub bind: String,
    /// REST port
    #[serde(default = "default_port")]
    pub port: u16,
    /// WebSocket sink port; disabled when absent
    #[serde(default)]
    pub websocket_port: Option<u16>,
    /// Buffer capacity exponent: capacity is `2^buffer_size`
    #[serde(default = "default_buffer_size")]
    pub buffer_size: u32,
    /// Snapshot the latest checkpoint every this many sequences
    #[serde(default = "default_checkpoint_frequency")]
    pub checkpoint_frequency: u64,
    #[serde(default = "default_max_assets")]
    pub max_assets: usize,
    /// Device model file (JSON device form)
    #[serde(default)]
    pub device_file: Option<PathBuf>,
    /// Rename the device file with a timestamp suffix before updates
    #[serde(default)]
    pub version_device_file: bool,
    /// Enable PUT/POST/DELETE mutations
    #[serde(default)]
    pub allow_put: bool,
    /// Remotes allowed to mutate; empty allows any when `allow_put`
    #[serde(default)]
    pub allow_put_from: Vec<String>,
    /// HTTP idle timeout in milliseconds
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Default streaming heartbeat in milliseconds
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
    #[serde(default)]
    pub adapters: Vec<ShdrAdapterConfig>,
    #[serde(default)]
    pub mqtt: Vec<MqttAdapterConfig>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            websocket_port: None,
            buffer_size: default_buffer_size(),
            checkpoint_frequency: default_checkpoint_frequency(),
            max_assets: default_max_assets(),
            device_file: None,
            version_device_file: false,
            allow_put: false,
            allow_put_from: Vec::new(),
            idle_timeout_ms: default_idle_timeout_ms(),
            heartbeat_ms: default_heartbeat_ms(),
            adapters: Vec::new(),
            mqtt: Vec::new(),
        }
    }
}

/// A line-oriented (SHDR) adapter connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShdrAdapterConfig {
    pub host: String,
    #[serde(default = "default_shdr_port")]
    pub port: u16,
    /// Device bound to unqualified keys
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub auto_available: bool,
    #[serde(default)]
    pub relative_time: bool,
    #[serde(default)]
    pub ignore_timestamps: bool,
    #[serde(default = "crate::config::default_true")]
    pub conversion_required: bool,
    #[serde(default = "crate::config::default_true")]
    pub upcase_values: bool,
    #[serde(default = "crate::config::default_true")]
    pub filter_duplicates: bool,
    /// Reconnect wait after a failure; clamped to at least 500 ms
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    /// Receive timeout before heartbeats are negotiated
    #[serde(default = "default_legacy_timeout_ms")]
    pub legacy_timeout_ms: u64,
}

/// A message-broker adapter session.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MqttAdapterConfig {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    /// Topics, optionally `deviceUuid:pattern`; `#` when empty
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub auto_available: bool,
    #[serde(default = "default_mqtt_reconnect_ms")]
    pub reconnect_interval_ms: u64,
    /// Enable TLS; certificate paths are handed to the transport layer
    #[serde(default)]
    pub tls: Option<MqttTlsConfig>,
    #[serde(default = "crate::config::default_true")]
    pub filter_duplicates: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MqttTlsConfig {
    pub ca_file: PathBuf,
    #[serde(default)]
    pub cert_file: Option<PathBuf>,
    #[serde(default)]
    pub key_file: Option<PathBuf>,
}

pub(crate) fn default_true() -> bool {
    true
}

impl AgentConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| AgentError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: AgentConfig = toml::from_str(&text)
            .map_err(|e| AgentError::Configuration(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 || self.buffer_size > 28 {
            return Err(AgentError::Configuration(format!(
                "buffer_size must be between 1 and 28, got {}",
                self.buffer_size
            )));
        }
        let capacity = 1u64 << self.buffer_size;
        if self.checkpoint_frequency == 0 || capacity % self.checkpoint_frequency != 0 {
            return Err(AgentError::Configuration(format!(
                "checkpoint_frequency {} must divide the buffer capacity {}",
                self.checkpoint_frequency, capacity
            )));
        }
        if self.max_assets == 0 {
            return Err(AgentError::Configuration(
                "max_assets must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
