//! chirp server - standalone SSDP discovery daemon.
//!
//! Advertises this host as a UPnP MediaServer, answers M-SEARCH requests,
//! tracks the root devices other hosts announce, and exposes them over a
//! small HTTP API.

mod config;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use anyhow::{Context, Result};
use chirp_core::{bind_listener, bootstrap_services, start_server, LocalIpDetector, NetworkContext};
use clap::Parser;
use tokio::signal;

use crate::config::ServerConfig;

/// chirp server - SSDP discovery for a UPnP/DLNA media server.
#[derive(Parser, Debug)]
#[command(name = "chirp-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "CHIRP_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// HTTP bind address (overrides config file).
    #[arg(long, env = "CHIRP_HTTP_IP")]
    http_ip: Option<IpAddr>,

    /// HTTP bind port (overrides config file).
    #[arg(short = 'p', long, env = "CHIRP_HTTP_PORT")]
    http_port: Option<u16>,

    /// Advertise IP address (overrides config file).
    #[arg(short = 'a', long, env = "CHIRP_ADVERTISE_IP")]
    advertise_ip: Option<IpAddr>,

    /// Local address for the SSDP socket (overrides config file).
    #[arg(long)]
    local_address: Option<Ipv4Addr>,

    /// SSDP multicast group (overrides config file).
    #[arg(long)]
    multicast_address: Option<Ipv4Addr>,

    /// SSDP port (overrides config file).
    #[arg(long)]
    multicast_port: Option<u16>,

    /// Device UUID (overrides config file).
    #[arg(short = 'u', long, env = "CHIRP_UUID")]
    uuid: Option<String>,

    /// Data directory for persistent state (device UUID).
    #[arg(short = 'd', long, env = "CHIRP_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("chirp server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(ip) = args.http_ip {
        config.http_ip = ip;
    }
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    if let Some(ip) = args.advertise_ip {
        config.advertise_ip = Some(ip);
    }
    if let Some(addr) = args.local_address {
        config.local_address = addr;
    }
    if let Some(addr) = args.multicast_address {
        config.multicast_address = addr;
    }
    if let Some(port) = args.multicast_port {
        config.multicast_port = port;
    }
    if let Some(uuid) = args.uuid {
        config.uuid = Some(uuid);
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = Some(data_dir);
    }

    // Resolve advertise IP: use explicit config, or fall back to auto-detection
    let network = if let Some(ip) = config.advertise_ip {
        log::info!(
            "Configuration: http={}:{}, advertise_ip={}",
            config.http_ip,
            config.http_port,
            ip
        );
        NetworkContext::explicit(config.http_port, ip)
    } else {
        log::info!(
            "Configuration: http={}:{}, advertise_ip=auto",
            config.http_ip,
            config.http_port
        );
        NetworkContext::auto_detect(config.http_port, LocalIpDetector::arc()).context(
            "Failed to auto-detect local IP address. \
             Please specify --advertise-ip or set CHIRP_ADVERTISE_IP to an IP \
             address other UPnP devices can reach.",
        )?
    };

    // Bind HTTP first so advertised locations carry the real port
    let listener = bind_listener(SocketAddr::new(config.http_ip, config.http_port), &network)
        .await
        .context("Failed to bind HTTP listener")?;

    let uuid = config.resolve_uuid().context("Failed to resolve device uuid")?;
    log::info!("Device uuid: {}", uuid);

    let services = bootstrap_services(config.to_core_config(uuid), network)
        .context("Failed to bootstrap services")?;
    log::info!("Services bootstrapped successfully");

    let app_state = services.app_state().context("Failed to build app state")?;
    let shutdown = services.cancel_token.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(listener, app_state, shutdown).await {
            log::error!("Server error: {}", e);
        }
    });

    services
        .start_background_tasks()
        .await
        .context("Failed to start discovery")?;
    log::info!("Discovery started");

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    // Sends the final byebyes and releases the HTTP server
    services.shutdown().await;

    if let Err(e) = server_handle.await {
        log::warn!("HTTP server task failed: {}", e);
    }

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
