//! SSDP multicast transport.
//!
//! A single UDP socket bound to the local listen address and the SSDP port
//! receives both multicast traffic and unicast replies to our own searches.
//! Outbound multicast is sent once per configured network attachment by
//! pointing `IP_MULTICAST_IF` at that attachment's address.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use thiserror::Error;
use tokio::net::UdpSocket;

use crate::protocol_constants::SSDP_MULTICAST_TTL;

/// Errors that abort transport startup.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket creation or configuration failed.
    #[error("Failed to create SSDP socket: {0}")]
    Socket(#[source] io::Error),

    /// Could not bind the listen address.
    #[error("Failed to bind SSDP socket to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Could not join the multicast group on an attachment.
    #[error("Failed to join multicast group {group} on {interface}: {source}")]
    JoinMulticast {
        group: Ipv4Addr,
        interface: Ipv4Addr,
        #[source]
        source: io::Error,
    },
}

/// Addresses the transport binds and joins.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub multicast_addr: Ipv4Addr,
    pub port: u16,
    /// Local address the socket binds to (usually `0.0.0.0`).
    pub listen_addr: Ipv4Addr,
    /// One entry per network attachment. `0.0.0.0` lets the kernel choose.
    pub interfaces: Vec<Ipv4Addr>,
}

impl TransportConfig {
    /// Multicast destination `group:port`.
    #[must_use]
    pub fn group(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.multicast_addr, self.port)
    }

    /// Attachments to use, falling back to the kernel default interface.
    #[must_use]
    pub fn attachments(&self) -> Vec<Ipv4Addr> {
        if self.interfaces.is_empty() {
            vec![Ipv4Addr::UNSPECIFIED]
        } else {
            self.interfaces.clone()
        }
    }
}

/// Datagram I/O used by the discovery engine.
///
/// Sends are best-effort: an `Err` only means this datagram was not handed
/// to the kernel.
#[async_trait]
pub trait SsdpTransport: Send + Sync {
    /// Number of network attachments multicast is sent on.
    fn attachment_count(&self) -> usize;

    /// Sends `payload` to the multicast group through attachment `attachment`.
    async fn multicast(&self, attachment: usize, payload: &[u8]) -> io::Result<()>;

    /// Sends `payload` to a single peer.
    async fn unicast(&self, payload: &[u8], dest: SocketAddr) -> io::Result<()>;

    /// Waits for the next datagram.
    async fn recv(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    /// Releases the socket. Later calls fail with `NotConnected`.
    fn close(&self);
}

/// [`SsdpTransport`] over a tokio UDP socket.
pub struct UdpTransport {
    socket: RwLock<Option<Arc<UdpSocket>>>,
    group: SocketAddrV4,
    attachments: Vec<Ipv4Addr>,
    /// Serializes `IP_MULTICAST_IF` changes with the send that depends on them.
    send_lock: tokio::sync::Mutex<()>,
}

impl UdpTransport {
    /// Binds the listen address and joins the group on every attachment.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(config: &TransportConfig) -> Result<Self, TransportError> {
        let attachments = config.attachments();
        let bind_addr = SocketAddr::new(IpAddr::V4(config.listen_addr), config.port);

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(TransportError::Socket)?;

        // Other UPnP stacks on this host share port 1900
        if let Err(e) = socket.set_reuse_address(true) {
            log::warn!("[SSDP] Failed to set SO_REUSEADDR: {}", e);
        }
        #[cfg(unix)]
        if let Err(e) = socket.set_reuse_port(true) {
            log::warn!("[SSDP] Failed to set SO_REUSEPORT: {}", e);
        }
        if let Err(e) = socket.set_multicast_ttl_v4(SSDP_MULTICAST_TTL) {
            log::warn!("[SSDP] Failed to set multicast TTL: {}", e);
        }
        if let Err(e) = socket.set_multicast_loop_v4(true) {
            log::warn!("[SSDP] Failed to enable multicast loopback: {}", e);
        }

        socket
            .set_nonblocking(true)
            .map_err(TransportError::Socket)?;
        socket
            .bind(&bind_addr.into())
            .map_err(|source| TransportError::Bind {
                addr: bind_addr,
                source,
            })?;

        for interface in &attachments {
            socket
                .join_multicast_v4(&config.multicast_addr, interface)
                .map_err(|source| TransportError::JoinMulticast {
                    group: config.multicast_addr,
                    interface: *interface,
                    source,
                })?;
            log::info!(
                "[SSDP] Joined {} on {} (listening on {})",
                config.multicast_addr,
                interface,
                bind_addr
            );
        }

        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket).map_err(TransportError::Socket)?;

        Ok(Self {
            socket: RwLock::new(Some(Arc::new(socket))),
            group: config.group(),
            attachments,
            send_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Local address the socket is bound to, if still open.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.read().as_ref().and_then(|s| s.local_addr().ok())
    }

    fn socket(&self) -> io::Result<Arc<UdpSocket>> {
        self.socket
            .read()
            .clone()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "SSDP socket closed"))
    }
}

#[async_trait]
impl SsdpTransport for UdpTransport {
    fn attachment_count(&self) -> usize {
        self.attachments.len()
    }

    async fn multicast(&self, attachment: usize, payload: &[u8]) -> io::Result<()> {
        let interface = *self.attachments.get(attachment).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no network attachment #{}", attachment),
            )
        })?;
        let socket = self.socket()?;

        let _guard = self.send_lock.lock().await;
        if !interface.is_unspecified() {
            SockRef::from(socket.as_ref()).set_multicast_if_v4(&interface)?;
        }
        socket.send_to(payload, SocketAddr::V4(self.group)).await?;
        Ok(())
    }

    async fn unicast(&self, payload: &[u8], dest: SocketAddr) -> io::Result<()> {
        let socket = self.socket()?;
        socket.send_to(payload, dest).await?;
        Ok(())
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let socket = self.socket()?;
        socket.recv_from(buf).await
    }

    fn close(&self) {
        if let Some(socket) = self.socket.write().take() {
            let group = *self.group.ip();
            for interface in &self.attachments {
                if let Err(e) = socket.leave_multicast_v4(group, *interface) {
                    log::debug!("[SSDP] Failed to leave {} on {}: {}", group, interface, e);
                }
            }
            log::info!("[SSDP] Socket closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_config() -> TransportConfig {
        TransportConfig {
            multicast_addr: "239.255.255.250".parse().unwrap(),
            port: 0,
            listen_addr: Ipv4Addr::LOCALHOST,
            interfaces: vec![Ipv4Addr::LOCALHOST],
        }
    }

    #[test]
    fn empty_interface_list_uses_default_attachment() {
        let config = TransportConfig {
            interfaces: Vec::new(),
            ..loopback_config()
        };
        assert_eq!(config.attachments(), vec![Ipv4Addr::UNSPECIFIED]);
        assert_eq!(config.group().to_string(), "239.255.255.250:0");
    }

    #[tokio::test]
    async fn unicast_round_trip_and_close() {
        // Multicast join on loopback is not available everywhere
        let Ok(transport) = UdpTransport::bind(&loopback_config()) else {
            return;
        };
        let addr = transport.local_addr().unwrap();

        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        peer.send_to(b"M-SEARCH * HTTP/1.1\r\n\r\n", addr)
            .await
            .unwrap();

        let mut buf = [0u8; 256];
        let (len, from) = transport.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"M-SEARCH * HTTP/1.1\r\n\r\n");

        transport.unicast(b"HTTP/1.1 200 OK\r\n\r\n", from).await.unwrap();
        let (len, _) = peer.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"HTTP/1.1 200 OK\r\n\r\n");

        transport.close();
        let err = transport.unicast(b"x", from).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn multicast_rejects_unknown_attachment() {
        let Ok(transport) = UdpTransport::bind(&loopback_config()) else {
            return;
        };
        let err = transport.multicast(5, b"x").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
