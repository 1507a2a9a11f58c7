//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// File inside `data_dir` holding the persisted device UUID.
const UUID_FILE: &str = "device-uuid";

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP server binds to.
    /// Override: `CHIRP_HTTP_IP`
    pub http_ip: IpAddr,

    /// Port the HTTP server binds to.
    /// Override: `CHIRP_HTTP_PORT`
    pub http_port: u16,

    /// IP address advertised in every SSDP `LOCATION`.
    /// If not specified, auto-detection will be attempted.
    /// Override: `CHIRP_ADVERTISE_IP`
    pub advertise_ip: Option<IpAddr>,

    /// Local address the SSDP socket binds to.
    pub local_address: Ipv4Addr,

    pub multicast_address: Ipv4Addr,

    pub multicast_port: u16,

    /// Device UUID. Generated (and persisted under `data_dir`) when absent.
    /// Override: `CHIRP_UUID`
    pub uuid: Option<String>,

    /// Friendly name in the root device description.
    pub friendly_name: Option<String>,

    /// Interface addresses to announce on. Empty means the default interface.
    pub interfaces: Vec<Ipv4Addr>,

    /// Advertised `max-age` in seconds.
    pub max_age_secs: u64,

    /// Directory for persistent data (device UUID).
    /// Override: `CHIRP_DATA_DIR`
    pub data_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let core = chirp_core::Config::default();
        Self {
            http_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            http_port: 8080,
            advertise_ip: None,
            local_address: core.listen_address,
            multicast_address: core.multicast_address,
            multicast_port: core.multicast_port,
            uuid: None,
            friendly_name: None,
            interfaces: Vec::new(),
            max_age_secs: core.max_age_secs,
            data_dir: None,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Applies environment overrides read through `lookup`.
    ///
    /// Unparsable values are ignored.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(ip) = lookup("CHIRP_HTTP_IP").and_then(|v| v.parse().ok()) {
            self.http_ip = ip;
        }

        if let Some(port) = lookup("CHIRP_HTTP_PORT").and_then(|v| v.parse().ok()) {
            self.http_port = port;
        }

        if let Some(ip) = lookup("CHIRP_ADVERTISE_IP").and_then(|v| v.parse().ok()) {
            self.advertise_ip = Some(ip);
        }

        if let Some(uuid) = lookup("CHIRP_UUID").filter(|v| !v.trim().is_empty()) {
            self.uuid = Some(uuid);
        }

        // Note: CHIRP_DATA_DIR is handled by clap via #[arg(env = ...)] in main.rs
    }

    /// Returns the configured UUID, or the one persisted under `data_dir`,
    /// or a fresh one (persisted when `data_dir` is set).
    pub fn resolve_uuid(&self) -> Result<String> {
        if let Some(uuid) = self.uuid.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            return Ok(uuid.to_string());
        }

        let Some(dir) = &self.data_dir else {
            let uuid = uuid::Uuid::new_v4().to_string();
            log::warn!(
                "No uuid or data directory configured, using ephemeral uuid {}",
                uuid
            );
            return Ok(uuid);
        };

        let path = dir.join(UUID_FILE);
        if let Ok(stored) = std::fs::read_to_string(&path) {
            let stored = stored.trim();
            if !stored.is_empty() {
                return Ok(stored.to_string());
            }
        }

        let uuid = uuid::Uuid::new_v4().to_string();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create data directory: {}", dir.display()))?;
        std::fs::write(&path, &uuid)
            .with_context(|| format!("Failed to persist uuid to {}", path.display()))?;
        log::info!("Generated device uuid {} ({})", uuid, path.display());
        Ok(uuid)
    }

    /// Converts to chirp-core's Config type.
    pub fn to_core_config(&self, uuid: String) -> chirp_core::Config {
        let defaults = chirp_core::Config::default();
        chirp_core::Config {
            uuid,
            friendly_name: self
                .friendly_name
                .clone()
                .unwrap_or(defaults.friendly_name.clone()),
            multicast_address: self.multicast_address,
            multicast_port: self.multicast_port,
            listen_address: self.local_address,
            interfaces: self.interfaces.clone(),
            max_age_secs: self.max_age_secs,
            ..defaults
        }
    }
}
