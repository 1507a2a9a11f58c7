//! SSDP discovery subsystem.
//!
//! Bottom-up:
//!
//! - [`codec`]: datagram encode and decode
//! - [`messages`]: outbound NOTIFY, search and response builders
//! - [`device`] / [`table`]: remote device records and their store
//! - [`namespace`]: the service types this device advertises
//! - [`description`]: root device description fetch, parse and render
//! - [`transport`]: multicast UDP socket
//! - [`engine`]: the protocol state machine

pub mod codec;
pub mod description;
pub mod device;
pub mod engine;
pub mod messages;
pub mod namespace;
pub mod table;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_fixtures;

pub use codec::{parse_max_age, CodecError, Headers, SsdpMessage, StartLine};
pub use description::{
    parse_root_description, render_root_description, DescriptionError, DescriptionFetcher,
    DeviceDescription, HttpDescriptionFetcher, LocalDevice,
};
pub use device::{root_key, DeviceRecord};
pub use engine::{DiscoveryEngine, EngineConfig, EngineError};
pub use messages::Advertiser;
pub use namespace::{Namespace, NamespaceRegistry};
pub use table::DeviceTable;
pub use transport::{SsdpTransport, TransportConfig, TransportError, UdpTransport};
