//! Application bootstrap and dependency wiring.
//!
//! This module is the composition root: the single place where the SSDP
//! transport, description fetcher, event subscribers and discovery engine are
//! created and wired together.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::api::AppState;
use crate::context::NetworkContext;
use crate::error::{ChirpError, ChirpResult};
use crate::events::{BroadcastEventBridge, LoggingEventHandler, SubscriptionId};
use crate::protocol_constants::{
    EVENT_CHANNEL_CAPACITY, NS_CONNECTION_MANAGER, NS_CONTENT_DIRECTORY, NS_MEDIA_SERVER,
    NS_ROOT_DEVICE, ST_ALL, UUID_PREFIX,
};
use crate::runtime::TokioSpawner;
use crate::ssdp::{
    DiscoveryEngine, HttpDescriptionFetcher, NamespaceRegistry, SsdpTransport, UdpTransport,
};
use crate::state::Config;
use crate::utils::strip_uuid_prefix;

/// Container for all bootstrapped services.
#[derive(Clone)]
pub struct BootstrappedServices {
    /// The SSDP protocol state machine.
    pub engine: Arc<DiscoveryEngine>,
    /// Feeds the live event stream of the HTTP API.
    pub event_bridge: Arc<BroadcastEventBridge>,
    /// Network configuration (port, advertise IP).
    pub network: NetworkContext,
    pub config: Arc<Config>,
    /// Cancelled on shutdown; the HTTP server waits on it.
    pub cancel_token: CancellationToken,
    bridge_subscription: SubscriptionId,
    logging_subscription: SubscriptionId,
}

impl BootstrappedServices {
    /// Starts the engine, announces every namespace, then searches for all
    /// devices on the network.
    pub async fn start_background_tasks(&self) -> ChirpResult<()> {
        self.engine.start()?;
        self.engine.announce().await;
        self.engine.search(ST_ALL);
        Ok(())
    }

    /// Builds the HTTP API state over these services.
    pub fn app_state(&self) -> ChirpResult<AppState> {
        AppState::builder()
            .engine(Arc::clone(&self.engine))
            .event_bridge(Arc::clone(&self.event_bridge))
            .network(self.network.clone())
            .config(Arc::clone(&self.config))
            .build()
            .map_err(|e| ChirpError::Internal(e.to_string()))
    }

    /// Initiates graceful shutdown of all services.
    ///
    /// Stops the engine (which sends the final byebyes and closes the
    /// socket), releases the HTTP server, then drops the bus subscriptions.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");

        self.engine.stop().await;
        self.cancel_token.cancel();

        let events = self.engine.events();
        events.unsubscribe(self.bridge_subscription);
        events.unsubscribe(self.logging_subscription);

        log::info!("[Bootstrap] Shutdown complete");
    }
}

/// Creates the HTTP client used for description fetches.
fn create_http_client(timeout: Duration) -> ChirpResult<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ChirpError::Internal(format!("Failed to create HTTP client: {}", e)))
}

/// Registers the namespaces this device advertises.
///
/// All of them share the root description URL as `LOCATION`.
pub fn build_namespaces(uuid: &str, location: &str) -> NamespaceRegistry {
    let mut namespaces = NamespaceRegistry::new();
    namespaces.register(format!("{}{}", UUID_PREFIX, uuid), location);
    namespaces.register(NS_ROOT_DEVICE, location);
    namespaces.register(NS_MEDIA_SERVER, location);
    namespaces.register(NS_CONTENT_DIRECTORY, location);
    namespaces.register(NS_CONNECTION_MANAGER, location);
    namespaces
}

/// Bootstraps all services with their dependencies.
///
/// The wiring order is:
///
/// 1. SSDP transport (binds the port and joins the group; fatal on error)
/// 2. HTTP client and description fetcher
/// 3. Namespace registry pointing at `network`'s root description URL
/// 4. Discovery engine
/// 5. Broadcast bridge and logging subscriber on the engine's bus
///
/// The network port must already be final, since it is baked into every
/// advertised `LOCATION`.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the socket cannot be
/// bound.
pub fn bootstrap_services(
    config: Config,
    network: NetworkContext,
) -> ChirpResult<BootstrappedServices> {
    config.validate().map_err(ChirpError::Configuration)?;

    let transport = UdpTransport::bind(&config.transport_config())?;
    log::info!(
        "[Bootstrap] SSDP transport bound on {} attachment(s)",
        transport.attachment_count()
    );
    let transport: Arc<dyn SsdpTransport> = Arc::new(transport);

    wire_services(config, network, transport)
}

/// Wires everything after the transport. Split out so tests can inject one.
fn wire_services(
    config: Config,
    network: NetworkContext,
    transport: Arc<dyn SsdpTransport>,
) -> ChirpResult<BootstrappedServices> {
    let http_client = create_http_client(config.description_timeout())?;
    let fetcher = Arc::new(HttpDescriptionFetcher::new(http_client));

    let location = network.root_description_url();
    let namespaces = build_namespaces(strip_uuid_prefix(config.uuid.trim()), &location);
    log::info!(
        "[Bootstrap] Advertising {} namespace(s) at {}",
        namespaces.len(),
        location
    );

    let engine = Arc::new(DiscoveryEngine::new(
        config.engine_config(),
        namespaces,
        transport,
        fetcher,
        TokioSpawner::current(),
    )?);

    let event_bridge = Arc::new(BroadcastEventBridge::new(EVENT_CHANNEL_CAPACITY));
    let bridge_subscription = engine.events().subscribe(event_bridge.clone());
    let logging_subscription = engine.events().subscribe(Arc::new(LoggingEventHandler));

    Ok(BootstrappedServices {
        engine,
        event_bridge,
        network,
        config: Arc::new(config),
        cancel_token: CancellationToken::new(),
        bridge_subscription,
        logging_subscription,
    })
}
