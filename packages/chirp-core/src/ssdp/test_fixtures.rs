//! Test doubles for the discovery engine.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Semaphore};

use super::codec::SsdpMessage;
use super::description::{DescriptionError, DescriptionFetcher, DescriptionResult, DeviceDescription};
use super::device::DeviceRecord;
use super::transport::SsdpTransport;

/// Builds a bare record for table and event tests.
pub fn record(identity: &str, last_seen: u64, cache_control: u64) -> DeviceRecord {
    DeviceRecord {
        identity: identity.to_string(),
        usn: identity.to_string(),
        notification_type: identity.to_string(),
        location: format!("http://192.168.1.50:49152/{}.xml", identity),
        server: "Test/1.0 UPnP/1.0".to_string(),
        host: String::new(),
        nts: String::new(),
        remote_ip: None,
        last_seen,
        cache_control,
        description: None,
    }
}

/// A datagram captured by [`MockTransport`].
#[derive(Debug, Clone)]
pub enum Sent {
    Multicast {
        attachment: usize,
        message: SsdpMessage,
    },
    Unicast {
        dest: SocketAddr,
        message: SsdpMessage,
    },
}

impl Sent {
    pub fn message(&self) -> &SsdpMessage {
        match self {
            Self::Multicast { message, .. } | Self::Unicast { message, .. } => message,
        }
    }

    pub fn nts(&self) -> Option<&str> {
        self.message().header("NTS")
    }
}

/// Recording transport with an injectable inbound queue.
pub struct MockTransport {
    attachments: usize,
    sent: Mutex<Vec<Sent>>,
    closed: AtomicBool,
    /// Number of upcoming sends to fail.
    fail_next: AtomicUsize,
    inbound_tx: mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>>,
}

impl MockTransport {
    pub fn new(attachments: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            attachments,
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            fail_next: AtomicUsize::new(0),
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
        }
    }

    /// Queues a datagram for the receive loop.
    pub fn inject(&self, data: &str, from: SocketAddr) {
        let _ = self.inbound_tx.send((data.as_bytes().to_vec(), from));
    }

    pub fn fail_next_sends(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn record(&self, sent: Sent) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "closed"));
        }
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(io::Error::new(io::ErrorKind::Other, "injected send failure"));
        }
        self.sent.lock().push(sent);
        Ok(())
    }
}

#[async_trait]
impl SsdpTransport for MockTransport {
    fn attachment_count(&self) -> usize {
        self.attachments
    }

    async fn multicast(&self, attachment: usize, payload: &[u8]) -> io::Result<()> {
        let message = SsdpMessage::parse(payload)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.record(Sent::Multicast {
            attachment,
            message,
        })
    }

    async fn unicast(&self, payload: &[u8], dest: SocketAddr) -> io::Result<()> {
        let message = SsdpMessage::parse(payload)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.record(Sent::Unicast { dest, message })
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let next = self.inbound_rx.lock().await.recv().await;
        match next {
            Some((data, from)) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Ok((len, from))
            }
            None => std::future::pending().await,
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Fetcher answering from a canned result.
///
/// A gated fetcher holds every fetch until [`release`](Self::release).
pub struct StubFetcher {
    fail: bool,
    calls: AtomicUsize,
    gate: Option<Semaphore>,
}

impl StubFetcher {
    pub fn ok() -> Self {
        Self {
            fail: false,
            calls: AtomicUsize::new(0),
            gate: None,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::ok()
        }
    }

    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::ok()
        }
    }

    /// Lets `count` held fetches complete.
    pub fn release(&self, count: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(count);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DescriptionFetcher for StubFetcher {
    async fn fetch(&self, location: &str) -> DescriptionResult<DeviceDescription> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if self.fail {
            return Err(DescriptionError::HttpStatus(404, location.to_string()));
        }
        Ok(DeviceDescription {
            device_type: "urn:schemas-upnp-org:device:MediaRenderer:1".to_string(),
            friendly_name: format!("Device at {}", location),
            udn: "uuid:stub".to_string(),
            ..Default::default()
        })
    }
}
