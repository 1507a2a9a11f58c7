//! Device arrival and departure events.
//!
//! This module provides:
//! - [`SsdpEvent`], fired by the discovery engine
//! - [`EventBus`], the subscription registry events are fanned out through
//! - [`EventHandler`] and the stock handlers (logging, broadcast bridge)

mod bridge;
mod bus;
mod emitter;

pub use bridge::BroadcastEventBridge;
pub use bus::{EventBus, SubscriptionId};
pub use emitter::{EventHandler, LoggingEventHandler};

use std::net::IpAddr;

use serde::Serialize;

use crate::ssdp::DeviceRecord;
use crate::utils::now_millis;

/// Event fired for a remote device.
///
/// Serialized for live API consumers as camelCase JSON tagged by `type`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SsdpEvent {
    /// A root device announced itself or answered a search.
    Announce {
        identity: String,
        #[serde(rename = "remoteIp")]
        remote_ip: Option<IpAddr>,
        record: DeviceRecord,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// A device said goodbye or its advertisement expired.
    Bye {
        identity: String,
        #[serde(rename = "remoteIp")]
        remote_ip: Option<IpAddr>,
        record: DeviceRecord,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

impl SsdpEvent {
    /// Builds an `Announce` for `record`.
    pub fn announce(remote_ip: Option<IpAddr>, record: DeviceRecord) -> Self {
        Self::Announce {
            identity: record.identity.clone(),
            remote_ip,
            record,
            timestamp: now_millis(),
        }
    }

    /// Builds a `Bye` for `record`.
    pub fn bye(remote_ip: Option<IpAddr>, record: DeviceRecord) -> Self {
        Self::Bye {
            identity: record.identity.clone(),
            remote_ip,
            record,
            timestamp: now_millis(),
        }
    }

    #[must_use]
    pub fn identity(&self) -> &str {
        match self {
            Self::Announce { identity, .. } | Self::Bye { identity, .. } => identity,
        }
    }

    #[must_use]
    pub fn record(&self) -> &DeviceRecord {
        match self {
            Self::Announce { record, .. } | Self::Bye { record, .. } => record,
        }
    }

    #[must_use]
    pub fn is_announce(&self) -> bool {
        matches!(self, Self::Announce { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssdp::test_fixtures::record;

    #[test]
    fn serializes_with_type_tag() {
        let event = SsdpEvent::bye(
            Some("192.168.1.9".parse().unwrap()),
            record("uuid:A", 1, 1800),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "bye");
        assert_eq!(json["identity"], "uuid:A");
        assert_eq!(json["remoteIp"], "192.168.1.9");
        assert_eq!(json["record"]["cacheControl"], 1800);
    }
}
