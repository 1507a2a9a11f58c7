//! HTTP API layer.
//!
//! Thin handlers over the discovery engine, plus the root device description
//! that every advertised `LOCATION` points at.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::context::NetworkContext;
use crate::events::BroadcastEventBridge;
use crate::ssdp::{DiscoveryEngine, LocalDevice};
use crate::state::Config;

pub mod http;
pub mod response;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind or serve on the TCP listener.
    #[error("Failed to bind HTTP listener: {0}")]
    Bind(#[from] std::io::Error),

    /// [`AppStateBuilder::build`] was called without a required field.
    #[error("AppState is missing required field: {0}")]
    MissingField(&'static str),
}

/// Shared application state for the API layer.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DiscoveryEngine>,
    /// Source of the live event stream.
    pub event_bridge: Arc<BroadcastEventBridge>,
    pub network: NetworkContext,
    pub config: Arc<Config>,
}

/// Builder for constructing an `AppState`.
#[derive(Default)]
pub struct AppStateBuilder {
    engine: Option<Arc<DiscoveryEngine>>,
    event_bridge: Option<Arc<BroadcastEventBridge>>,
    network: Option<NetworkContext>,
    config: Option<Arc<Config>>,
}

impl AppStateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn engine(mut self, engine: Arc<DiscoveryEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn event_bridge(mut self, bridge: Arc<BroadcastEventBridge>) -> Self {
        self.event_bridge = Some(bridge);
        self
    }

    pub fn network(mut self, network: NetworkContext) -> Self {
        self.network = Some(network);
        self
    }

    pub fn config(mut self, config: Arc<Config>) -> Self {
        self.config = Some(config);
        self
    }

    /// Builds the `AppState`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::MissingField`] if a field was never set.
    pub fn build(self) -> Result<AppState, ServerError> {
        Ok(AppState {
            engine: self.engine.ok_or(ServerError::MissingField("engine"))?,
            event_bridge: self
                .event_bridge
                .ok_or(ServerError::MissingField("event_bridge"))?,
            network: self.network.ok_or(ServerError::MissingField("network"))?,
            config: self.config.ok_or(ServerError::MissingField("config"))?,
        })
    }
}

impl AppState {
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::new()
    }

    /// Identity published in `/rootDesc.xml`.
    #[must_use]
    pub fn local_device(&self) -> LocalDevice {
        LocalDevice {
            uuid: self.engine.uuid().to_string(),
            friendly_name: self.config.friendly_name.clone(),
            base_url: self.network.url_builder().base_url(),
        }
    }
}

/// Binds the HTTP listener and records the actual port in `network`.
///
/// Call before bootstrapping so advertised locations carry the real port.
pub async fn bind_listener(
    addr: SocketAddr,
    network: &NetworkContext,
) -> Result<TcpListener, ServerError> {
    let listener = TcpListener::bind(addr).await?;
    let port = listener.local_addr()?.port();
    network.set_port(port);
    Ok(listener)
}

/// Serves the API until `shutdown` is cancelled.
pub async fn start_server(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let addr = listener.local_addr()?;
    let app = http::create_router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    log::info!("[Server] Listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    log::info!("[Server] HTTP server stopped");
    Ok(())
}
