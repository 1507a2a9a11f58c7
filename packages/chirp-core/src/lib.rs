//! chirp core - SSDP discovery for a UPnP/DLNA media server.
//!
//! The crate advertises this server's namespaces on the SSDP multicast group,
//! answers searches, and keeps a table of the root devices other hosts
//! announce. It is used by the standalone `chirp-server` binary.
//!
//! # Architecture
//!
//! - [`ssdp`]: wire codec, transport, device table, namespace registry,
//!   description fetch and the [`DiscoveryEngine`](ssdp::DiscoveryEngine)
//! - [`events`]: device events and the subscription bus
//! - [`context`]: advertise address and URL building
//! - [`state`]: core configuration
//! - [`api`]: HTTP surface over the engine
//! - [`bootstrap`]: composition root
//! - [`error`]: centralized error types
//!
//! # Abstraction Traits
//!
//! - [`SsdpTransport`](ssdp::SsdpTransport): datagram I/O
//! - [`DescriptionFetcher`](ssdp::DescriptionFetcher): root description retrieval
//! - [`EventHandler`](events::EventHandler): event subscribers
//! - [`TaskSpawner`](runtime::TaskSpawner): detached background work
//! - [`IpDetector`](context::IpDetector): local IP detection

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod bootstrap;
pub mod context;
pub mod error;
pub mod events;
pub mod protocol_constants;
pub mod runtime;
pub mod ssdp;
pub mod state;
pub mod utils;

// Re-export commonly used types at the crate root
pub use context::{IpDetector, LocalIpDetector, NetworkContext, NetworkError, UrlBuilder};
pub use error::{ChirpError, ChirpResult, ErrorCode};
pub use events::{
    BroadcastEventBridge, EventBus, EventHandler, LoggingEventHandler, SsdpEvent, SubscriptionId,
};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use state::Config;
pub use utils::now_millis;

// Re-export SSDP types
pub use ssdp::{
    DeviceDescription, DeviceRecord, DeviceTable, DiscoveryEngine, EngineConfig, EngineError,
    Namespace, NamespaceRegistry, SsdpMessage, SsdpTransport, TransportConfig, UdpTransport,
};

// Re-export bootstrap types
pub use bootstrap::{bootstrap_services, BootstrappedServices};

// Re-export API types
pub use api::{bind_listener, start_server, AppState, AppStateBuilder, ServerError};
