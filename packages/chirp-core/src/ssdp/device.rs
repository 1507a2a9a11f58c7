//! Discovered remote device records.

use std::net::IpAddr;

use serde::Serialize;

use crate::protocol_constants::{
    HEADER_CACHE_CONTROL, HEADER_HOST, HEADER_LOCATION, HEADER_NT, HEADER_NTS, HEADER_SERVER,
    HEADER_ST, HEADER_USN, NS_ROOT_DEVICE, USN_SEPARATOR,
};

use super::codec::{parse_max_age, SsdpMessage};
use super::description::DeviceDescription;

/// A remote UPnP root device seen on the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    /// Root-device key this record is stored under.
    pub identity: String,
    /// USN exactly as received.
    pub usn: String,
    /// `NT` of a notification or `ST` of a search response.
    pub notification_type: String,
    pub location: String,
    pub server: String,
    pub host: String,
    /// `NTS` of the last notification (empty for search responses).
    pub nts: String,
    pub remote_ip: Option<IpAddr>,
    /// Unix milliseconds of the last announcement or refresh.
    pub last_seen: u64,
    /// Advertised lifetime in seconds.
    pub cache_control: u64,
    /// Parsed root description, once fetched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<DeviceDescription>,
}

impl DeviceRecord {
    /// Builds a record from the headers of a NOTIFY or a search response.
    ///
    /// `NT` falls back to `ST`, so both message kinds fill `notification_type`.
    /// The identity is the derived root key, or the raw USN when none can be derived.
    pub fn from_message(msg: &SsdpMessage, remote_ip: Option<IpAddr>, now_ms: u64) -> Self {
        let headers = &msg.headers;
        let usn = headers.get_or_empty(HEADER_USN).to_string();
        let notification_type = headers
            .get(HEADER_NT)
            .or_else(|| headers.get(HEADER_ST))
            .unwrap_or("")
            .to_string();
        let identity = root_key(&usn, &notification_type).unwrap_or_else(|| usn.clone());

        Self {
            identity,
            usn,
            notification_type,
            location: headers.get_or_empty(HEADER_LOCATION).to_string(),
            server: headers.get_or_empty(HEADER_SERVER).to_string(),
            host: headers.get_or_empty(HEADER_HOST).to_string(),
            nts: headers.get_or_empty(HEADER_NTS).to_string(),
            remote_ip,
            last_seen: now_ms,
            cache_control: parse_max_age(headers.get(HEADER_CACHE_CONTROL)),
            description: None,
        }
    }

    /// Attaches a fetched root description.
    #[must_use]
    pub fn with_description(mut self, description: DeviceDescription) -> Self {
        self.description = Some(description);
        self
    }

    /// Returns `true` once the advertised lifetime has fully elapsed at `now_ms`.
    #[must_use]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.last_seen
            .saturating_add(self.cache_control.saturating_mul(1000))
            < now_ms
    }

    /// Returns `true` if this record describes a root device announcement
    /// rather than one of its embedded devices or services.
    #[must_use]
    pub fn is_root_notification(&self) -> bool {
        is_root_notification(&self.usn, &self.notification_type)
    }
}

/// Derives the root-device key from a USN.
///
/// `uuid:<id>::<namespace>` yields `uuid:<id>`. A USN without a separator is
/// only accepted as-is when it is the root device or an untyped device
/// (`NT` equal to the USN). Anything else has no derivable key.
#[must_use]
pub fn root_key(usn: &str, nt: &str) -> Option<String> {
    if usn.is_empty() {
        return None;
    }
    if let Some(pos) = usn.find(USN_SEPARATOR) {
        return Some(usn[..pos].to_string());
    }
    if nt == NS_ROOT_DEVICE || nt == usn {
        return Some(usn.to_string());
    }
    None
}

/// Returns `true` for root-device notifications: `NT` is `upnp:rootdevice`
/// or equals the full USN.
#[must_use]
pub fn is_root_notification(usn: &str, nt: &str) -> bool {
    nt == NS_ROOT_DEVICE || (!usn.is_empty() && nt == usn)
}
