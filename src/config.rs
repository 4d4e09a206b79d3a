//! Configuration loading and types.
//!
//! All settings are optional in YAML; anything missing falls back to the
//! defaults below, so an empty (or absent) config file yields a working
//! host.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub coprocessor: CoprocessorConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Advertise the host on the LAN via mDNS.
    #[serde(default = "default_true")]
    pub mdns: bool,
    /// Delay between the termination broadcast and process exit, giving
    /// connected clients a chance to show the notice.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProtocolConfig {
    #[serde(default = "default_max_tasks")]
    pub max_tasks: i32,
    #[serde(default = "default_max_integrity")]
    pub max_integrity: i32,
    #[serde(default = "default_expiry_days")]
    pub expiry_days: i64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// How often to check for tasks entering their final hour.
    #[serde(default = "default_call_check_interval_secs")]
    pub call_check_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoprocessorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_coprocessor_url")]
    pub base_url: String,
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
    #[serde(default = "default_sitrep_interval_secs")]
    pub sitrep_interval_secs: u64,
}

fn default_port() -> u16 {
    4040
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_true() -> bool {
    true
}

fn default_shutdown_grace_ms() -> u64 {
    1500
}

fn default_max_tasks() -> i32 {
    5
}

fn default_max_integrity() -> i32 {
    3
}

fn default_expiry_days() -> i64 {
    7
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_call_check_interval_secs() -> u64 {
    15
}

fn default_coprocessor_url() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_probe_interval_secs() -> u64 {
    10
}

fn default_sitrep_interval_secs() -> u64 {
    45
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            mdns: default_true(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_tasks: default_max_tasks(),
            max_integrity: default_max_integrity(),
            expiry_days: default_expiry_days(),
            sweep_interval_secs: default_sweep_interval_secs(),
            call_check_interval_secs: default_call_check_interval_secs(),
        }
    }
}

impl Default for CoprocessorConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            base_url: default_coprocessor_url(),
            probe_interval_secs: default_probe_interval_secs(),
            sitrep_interval_secs: default_sitrep_interval_secs(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file, or defaults if the path does
    /// not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    pub fn limits(&self) -> crate::store::Limits {
        crate::store::Limits {
            max_tasks: self.protocol.max_tasks,
            max_integrity: self.protocol.max_integrity,
            expiry_ms: self.protocol.expiry_days * 24 * 60 * 60 * 1000,
            warning_window_ms: 60 * 60 * 1000,
        }
    }
}
