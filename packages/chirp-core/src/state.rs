//! Core configuration.
//!
//! [`Config`] holds everything the discovery subsystem needs. The server
//! binary builds one from its YAML file, environment and CLI flags; embedders
//! can deserialize it directly (camelCase keys, every field optional).

use std::net::Ipv4Addr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol_constants::{
    ANNOUNCE_TICK_SECS, DEFAULT_MAX_AGE_SECS, DEFAULT_SEARCH_MX, DEFAULT_SEARCH_WINDOW_SECS,
    DESCRIPTION_TIMEOUT_SECS, SSDP_MULTICAST_ADDR, SSDP_PORT,
};
use crate::ssdp::{EngineConfig, TransportConfig};
use crate::utils::{local_hostname, server_banner};

/// Configuration for the discovery subsystem.
///
/// All fields have sensible defaults.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Own device UUID, without the `uuid:` prefix.
    pub uuid: String,

    /// Friendly name published in the root device description.
    pub friendly_name: String,

    // Transport
    /// SSDP multicast group.
    pub multicast_address: Ipv4Addr,

    /// SSDP port, used both for the group and the local bind.
    pub multicast_port: u16,

    /// Local address the SSDP socket binds to.
    pub listen_address: Ipv4Addr,

    /// Network attachments to announce on. Empty means the default interface.
    pub interfaces: Vec<Ipv4Addr>,

    // Engine
    /// Advertised `max-age` in seconds.
    pub max_age_secs: u64,

    /// Period of the maintenance loop (seconds).
    pub announce_tick_secs: u64,

    /// How long an M-SEARCH stays open (seconds).
    pub search_window_secs: u64,

    /// `MX` value of outbound searches.
    pub search_mx: u8,

    /// Timeout for fetching remote root device descriptions (seconds).
    pub description_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            uuid: String::new(),
            friendly_name: format!("chirp on {}", local_hostname()),
            multicast_address: SSDP_MULTICAST_ADDR,
            multicast_port: SSDP_PORT,
            listen_address: Ipv4Addr::UNSPECIFIED,
            interfaces: Vec::new(),
            max_age_secs: DEFAULT_MAX_AGE_SECS,
            announce_tick_secs: ANNOUNCE_TICK_SECS,
            search_window_secs: DEFAULT_SEARCH_WINDOW_SECS,
            search_mx: DEFAULT_SEARCH_MX,
            description_timeout_secs: DESCRIPTION_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Validates values that would break the engine at runtime.
    pub fn validate(&self) -> Result<(), String> {
        if self.uuid.trim().is_empty() {
            return Err("uuid must not be empty".to_string());
        }
        if !self.multicast_address.is_multicast() {
            return Err(format!(
                "multicast_address {} is not a multicast address",
                self.multicast_address
            ));
        }
        if self.max_age_secs < 3 {
            return Err("max_age_secs must be >= 3".to_string());
        }
        if self.announce_tick_secs == 0 {
            return Err("announce_tick_secs must be >= 1".to_string());
        }
        Ok(())
    }

    /// `HOST` header value for outbound messages.
    #[must_use]
    pub fn multicast_host(&self) -> String {
        format!("{}:{}", self.multicast_address, self.multicast_port)
    }

    #[must_use]
    pub fn description_timeout(&self) -> Duration {
        Duration::from_secs(self.description_timeout_secs)
    }

    #[must_use]
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            multicast_addr: self.multicast_address,
            port: self.multicast_port,
            listen_addr: self.listen_address,
            interfaces: self.interfaces.clone(),
        }
    }

    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            uuid: self.uuid.clone(),
            host: self.multicast_host(),
            server: server_banner(),
            max_age_secs: self.max_age_secs,
            tick: Duration::from_secs(self.announce_tick_secs),
            search_window: Duration::from_secs(self.search_window_secs),
            search_mx: self.search_mx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_is_sensible() {
        let config = Config::default();
        assert_eq!(config.multicast_host(), "239.255.255.250:1900");
        assert_eq!(config.max_age_secs, 1800);
        assert_eq!(config.search_mx, 2);
        assert!(config.interfaces.is_empty());
        assert!(config.friendly_name.starts_with("chirp on "));
    }

    #[test]
    fn default_config_requires_uuid() {
        let mut config = Config::default();
        assert!(config.validate().is_err());
        config.uuid = "5c863963-f2a2-491e-8b60-079cdadad147".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_unicast_group_and_tiny_max_age() {
        let mut config = Config {
            uuid: "abc".to_string(),
            ..Default::default()
        };
        config.multicast_address = Ipv4Addr::new(192, 168, 1, 1);
        assert!(config.validate().is_err());

        config.multicast_address = SSDP_MULTICAST_ADDR;
        config.max_age_secs = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"uuid":"abc","maxAgeSecs":60,"interfaces":["10.0.0.2"]}"#)
                .unwrap();
        assert_eq!(config.uuid, "abc");
        assert_eq!(config.max_age_secs, 60);
        assert_eq!(config.interfaces, vec![Ipv4Addr::new(10, 0, 0, 2)]);
        assert_eq!(config.multicast_port, 1900);
    }

    #[test]
    fn derived_configs_carry_settings() {
        let config = Config {
            uuid: "abc".to_string(),
            max_age_secs: 90,
            search_window_secs: 7,
            ..Default::default()
        };
        let engine = config.engine_config();
        assert_eq!(engine.host, "239.255.255.250:1900");
        assert_eq!(engine.reannounce_interval(), Duration::from_secs(30));
        assert_eq!(engine.search_window, Duration::from_secs(7));

        let transport = config.transport_config();
        assert_eq!(transport.attachments(), vec![Ipv4Addr::UNSPECIFIED]);
    }
}
