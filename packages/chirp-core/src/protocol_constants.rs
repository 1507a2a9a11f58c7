//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by the UPnP Device Architecture and SSDP drafts.
//! Changing them breaks interoperability with other devices on the network.

use std::net::Ipv4Addr;

// ─────────────────────────────────────────────────────────────────────────────
// SSDP Transport
// ─────────────────────────────────────────────────────────────────────────────

/// IPv4 multicast group used by SSDP.
pub const SSDP_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

/// UDP port used by SSDP.
pub const SSDP_PORT: u16 = 1900;

/// Multicast TTL for outbound SSDP datagrams.
///
/// UPnP 1.0 recommends 4.
pub const SSDP_MULTICAST_TTL: u32 = 4;

/// Receive buffer for a single SSDP datagram.
pub const SSDP_RECV_BUFFER_SIZE: usize = 8192;

// ─────────────────────────────────────────────────────────────────────────────
// SSDP Methods & Start Lines
// ─────────────────────────────────────────────────────────────────────────────

pub const METHOD_NOTIFY: &str = "NOTIFY";
pub const METHOD_MSEARCH: &str = "M-SEARCH";

/// Request target for every SSDP request.
pub const SSDP_REQUEST_TARGET: &str = "*";

pub const HTTP_VERSION: &str = "HTTP/1.1";

// ─────────────────────────────────────────────────────────────────────────────
// SSDP Header Names (upper-case on the wire)
// ─────────────────────────────────────────────────────────────────────────────

pub const HEADER_HOST: &str = "HOST";
pub const HEADER_CACHE_CONTROL: &str = "CACHE-CONTROL";
pub const HEADER_LOCATION: &str = "LOCATION";
pub const HEADER_SERVER: &str = "SERVER";
pub const HEADER_NT: &str = "NT";
pub const HEADER_NTS: &str = "NTS";
pub const HEADER_USN: &str = "USN";
pub const HEADER_ST: &str = "ST";
pub const HEADER_MX: &str = "MX";
pub const HEADER_MAN: &str = "MAN";
pub const HEADER_EXT: &str = "EXT";
pub const HEADER_DATE: &str = "DATE";
pub const HEADER_CONTENT_LENGTH: &str = "CONTENT-LENGTH";

// ─────────────────────────────────────────────────────────────────────────────
// SSDP Header Values
// ─────────────────────────────────────────────────────────────────────────────

/// NTS value for a device coming online or refreshing.
pub const NTS_ALIVE: &str = "ssdp:alive";

/// NTS value for a device leaving the network.
pub const NTS_BYEBYE: &str = "ssdp:byebye";

/// MAN value for M-SEARCH requests (quotes are part of the value).
pub const MAN_DISCOVER: &str = "\"ssdp:discover\"";

/// Search target matching every device and service.
pub const ST_ALL: &str = "ssdp:all";

/// Literal prefix of the `CACHE-CONTROL` value.
pub const MAX_AGE_PREFIX: &str = "max-age=";

/// Separator between the device UUID and the namespace inside a USN.
pub const USN_SEPARATOR: &str = "::";

/// Prefix of a device identity inside a USN.
pub const UUID_PREFIX: &str = "uuid:";

// ─────────────────────────────────────────────────────────────────────────────
// UPnP Namespaces
// ─────────────────────────────────────────────────────────────────────────────

/// Root device namespace. Searching for it returns every advertised namespace.
pub const NS_ROOT_DEVICE: &str = "upnp:rootdevice";

pub const NS_MEDIA_SERVER: &str = "urn:schemas-upnp-org:device:MediaServer:1";
pub const NS_CONTENT_DIRECTORY: &str = "urn:schemas-upnp-org:service:ContentDirectory:1";
pub const NS_CONNECTION_MANAGER: &str = "urn:schemas-upnp-org:service:ConnectionManager:1";

/// XML namespace of a UPnP device description document.
pub const UPNP_DEVICE_XMLNS: &str = "urn:schemas-upnp-org:device-1-0";

// ─────────────────────────────────────────────────────────────────────────────
// Timing
// ─────────────────────────────────────────────────────────────────────────────

/// Default advertised max-age (seconds). UPnP requires at least 1800.
pub const DEFAULT_MAX_AGE_SECS: u64 = 1800;

/// Tick of the re-announce and expiry loop (seconds).
pub const ANNOUNCE_TICK_SECS: u64 = 5;

/// Default M-SEARCH `MX` value (seconds).
pub const DEFAULT_SEARCH_MX: u8 = 2;

/// How long a search stays open for responses (seconds).
pub const DEFAULT_SEARCH_WINDOW_SECS: u64 = 20;

/// Timeout for fetching a remote root device description (seconds).
pub const DESCRIPTION_TIMEOUT_SECS: u64 = 10;

/// Pause after a receive error before reading the socket again (milliseconds).
pub const RECV_ERROR_BACKOFF_MS: u64 = 100;

// ─────────────────────────────────────────────────────────────────────────────
// Service Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Product token used in the SERVER banner.
pub const APP_NAME: &str = "chirp";

/// Service identifier returned by the health endpoint.
pub const SERVICE_ID: &str = "chirp-server";

/// Path of this server's root device description.
pub const ROOT_DESCRIPTION_PATH: &str = "/rootDesc.xml";

/// Capacity of the broadcast channel feeding live event consumers.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;
