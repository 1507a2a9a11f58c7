//! SSDP discovery engine.
//!
//! The engine is the protocol state machine tying the pieces together:
//!
//! - inbound datagrams are decoded and classified as M-SEARCH, alive,
//!   byebye, or search response
//! - the [`DeviceTable`] is updated and events are fired on the [`EventBus`]
//! - own namespaces are announced, suppressed, and re-announced before they
//!   expire on other peers
//! - stale remote devices are expired
//!
//! # Lifecycle
//!
//! [`DiscoveryEngine::start`] spawns the receive loop and the maintenance
//! loop on a [`TaskTracker`]. [`DiscoveryEngine::stop`] cancels and joins
//! them, sends a final byebye for every namespace, then closes the transport.
//! Nothing is sent or received after `stop` returns.
//!
//! Description fetches for newly seen devices run detached. A fetch that
//! finishes after shutdown is discarded.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::events::{EventBus, SsdpEvent};
use crate::protocol_constants::{
    ANNOUNCE_TICK_SECS, DEFAULT_MAX_AGE_SECS, DEFAULT_SEARCH_MX, DEFAULT_SEARCH_WINDOW_SECS,
    HEADER_CACHE_CONTROL, HEADER_NT, HEADER_NTS, HEADER_ST, HEADER_USN, METHOD_MSEARCH,
    METHOD_NOTIFY, NTS_ALIVE, NTS_BYEBYE, RECV_ERROR_BACKOFF_MS, SSDP_RECV_BUFFER_SIZE,
};
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::utils::{now_millis, server_banner, strip_uuid_prefix};

use super::codec::{parse_max_age, SsdpMessage};
use super::description::DescriptionFetcher;
use super::device::{is_root_notification, root_key, DeviceRecord};
use super::messages::Advertiser;
use super::namespace::NamespaceRegistry;
use super::table::DeviceTable;
use super::transport::SsdpTransport;

/// Errors from engine lifecycle calls.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    /// The own UUID is empty, which would suppress every inbound message.
    #[error("Own device UUID must not be empty")]
    MissingUuid,

    /// `start` was called on a running engine.
    #[error("Discovery engine is already running")]
    AlreadyRunning,

    /// `start` was called after `stop`.
    #[error("Discovery engine has been stopped")]
    Stopped,
}

/// Tunables of the discovery engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Own device UUID, with or without the `uuid:` prefix.
    pub uuid: String,
    /// `HOST` header value, `<group>:<port>`.
    pub host: String,
    /// `SERVER` banner.
    pub server: String,
    /// Advertised max-age. Re-announce happens after a third of it.
    pub max_age_secs: u64,
    /// Period of the maintenance loop.
    pub tick: Duration,
    /// How long a search stays open.
    pub search_window: Duration,
    /// `MX` of outbound searches.
    pub search_mx: u8,
}

impl EngineConfig {
    /// Config with protocol defaults for `uuid` and `host`.
    pub fn new(uuid: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            host: host.into(),
            server: server_banner(),
            max_age_secs: DEFAULT_MAX_AGE_SECS,
            tick: Duration::from_secs(ANNOUNCE_TICK_SECS),
            search_window: Duration::from_secs(DEFAULT_SEARCH_WINDOW_SECS),
            search_mx: DEFAULT_SEARCH_MX,
        }
    }

    /// Elapsed time after which the full announce cycle is repeated.
    #[must_use]
    pub fn reannounce_interval(&self) -> Duration {
        Duration::from_secs(self.max_age_secs / 3)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Idle,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy)]
enum Notification {
    Alive,
    ByeBye,
}

/// The SSDP protocol state machine.
///
/// Shared as `Arc<DiscoveryEngine>`; the receive loop, the maintenance loop,
/// search tasks, and description fetches each hold a clone.
pub struct DiscoveryEngine {
    config: EngineConfig,
    advertiser: Advertiser,
    namespaces: NamespaceRegistry,
    table: DeviceTable,
    bus: EventBus,
    transport: Arc<dyn SsdpTransport>,
    fetcher: Arc<dyn DescriptionFetcher>,
    spawner: TokioSpawner,
    /// Identities with a description fetch in flight.
    pending_fetches: DashSet<String>,
    last_announce: Mutex<Instant>,
    state: Mutex<EngineState>,
    cancel: CancellationToken,
    tasks: TaskTracker,
    searches_in_flight: AtomicUsize,
}

impl DiscoveryEngine {
    /// Creates an idle engine. The registry is frozen from here on.
    pub fn new(
        config: EngineConfig,
        namespaces: NamespaceRegistry,
        transport: Arc<dyn SsdpTransport>,
        fetcher: Arc<dyn DescriptionFetcher>,
        spawner: TokioSpawner,
    ) -> Result<Self, EngineError> {
        let uuid = strip_uuid_prefix(config.uuid.trim()).to_string();
        if uuid.is_empty() {
            return Err(EngineError::MissingUuid);
        }
        let advertiser = Advertiser {
            uuid,
            host: config.host.clone(),
            server: config.server.clone(),
            max_age_secs: config.max_age_secs,
        };

        Ok(Self {
            config,
            advertiser,
            namespaces,
            table: DeviceTable::new(),
            bus: EventBus::new(),
            transport,
            fetcher,
            spawner,
            pending_fetches: DashSet::new(),
            last_announce: Mutex::new(Instant::now()),
            state: Mutex::new(EngineState::Idle),
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
            searches_in_flight: AtomicUsize::new(0),
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Own UUID without the `uuid:` prefix.
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.advertiser.uuid
    }

    /// Subscription point for device events.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    #[must_use]
    pub fn namespaces(&self) -> &NamespaceRegistry {
        &self.namespaces
    }

    /// Read-only copy of the device table.
    #[must_use]
    pub fn devices(&self) -> Vec<DeviceRecord> {
        self.table.snapshot()
    }

    #[must_use]
    pub fn device(&self, identity: &str) -> Option<DeviceRecord> {
        self.table.get(identity)
    }

    #[must_use]
    pub fn device_count(&self) -> usize {
        self.table.len()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        *self.state.lock() == EngineState::Running
    }

    #[must_use]
    pub fn searches_in_flight(&self) -> usize {
        self.searches_in_flight.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn pending_fetch_count(&self) -> usize {
        self.pending_fetches.len()
    }

    #[cfg(test)]
    pub(crate) fn table(&self) -> &DeviceTable {
        &self.table
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Spawns the receive loop and the maintenance loop.
    ///
    /// Does not announce; callers follow up with [`announce`](Self::announce).
    pub fn start(self: &Arc<Self>) -> Result<(), EngineError> {
        {
            let mut state = self.state.lock();
            match *state {
                EngineState::Idle => *state = EngineState::Running,
                EngineState::Running => return Err(EngineError::AlreadyRunning),
                EngineState::Stopped => return Err(EngineError::Stopped),
            }
        }
        *self.last_announce.lock() = Instant::now();

        let engine = Arc::clone(self);
        self.tasks.spawn(async move { engine.receive_loop().await });

        let engine = Arc::clone(self);
        self.tasks.spawn(async move { engine.maintenance_loop().await });

        log::info!(
            "[Engine] Started: uuid={}, {} namespace(s), {} attachment(s)",
            self.advertiser.uuid,
            self.namespaces.len(),
            self.transport.attachment_count()
        );
        Ok(())
    }

    /// Stops the engine.
    ///
    /// Joins every background task, sends byebye for all namespaces, then
    /// closes the transport. Calling it again is a no-op.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock();
            if *state == EngineState::Stopped {
                return;
            }
            *state = EngineState::Stopped;
        }

        log::info!("[Engine] Stopping...");
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;

        self.suppress().await;
        self.transport.close();
        log::info!("[Engine] Stopped");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Outbound
    // ─────────────────────────────────────────────────────────────────────────

    /// Sends byebye then alive for every attachment × namespace.
    pub async fn announce(&self) {
        self.suppress().await;
        let sent = self.notify_all(Notification::Alive).await;
        *self.last_announce.lock() = Instant::now();
        log::debug!("[Engine] Announced {} alive notification(s)", sent);
    }

    /// Sends byebye for every attachment × namespace.
    pub async fn suppress(&self) {
        let sent = self.notify_all(Notification::ByeBye).await;
        log::debug!("[Engine] Sent {} byebye notification(s)", sent);
    }

    async fn notify_all(&self, kind: Notification) -> usize {
        let mut sent = 0;
        for attachment in 0..self.transport.attachment_count() {
            for ns in self.namespaces.iter() {
                let message = match kind {
                    Notification::Alive => self.advertiser.alive(&ns.service_type, &ns.location),
                    Notification::ByeBye => self.advertiser.byebye(&ns.service_type),
                };
                match self.transport.multicast(attachment, &message.to_bytes()).await {
                    Ok(()) => sent += 1,
                    Err(e) => log::warn!(
                        "[Engine] Failed to send {:?} for {} on attachment {}: {}",
                        kind,
                        ns.service_type,
                        attachment,
                        e
                    ),
                }
            }
        }
        sent
    }

    /// Multicasts an M-SEARCH for `st` without waiting for answers.
    ///
    /// Responses arrive through the receive loop and surface as `Announce`
    /// events. The search stays open for the configured window or until the
    /// engine stops.
    pub fn search(self: &Arc<Self>, st: impl Into<String>) {
        let st = st.into();
        // Held until the task is tracked so `stop` cannot close the tracker in between
        let state = self.state.lock();
        if *state == EngineState::Stopped || self.tasks.is_closed() {
            log::warn!("[Engine] Ignoring search for {} after stop", st);
            return;
        }

        self.searches_in_flight.fetch_add(1, Ordering::SeqCst);
        let engine = Arc::clone(self);
        self.tasks.spawn(async move {
            let payload = engine
                .advertiser
                .msearch(&st, engine.config.search_mx)
                .to_bytes();
            for attachment in 0..engine.transport.attachment_count() {
                if let Err(e) = engine.transport.multicast(attachment, &payload).await {
                    log::warn!(
                        "[Engine] Failed to send M-SEARCH for {} on attachment {}: {}",
                        st,
                        attachment,
                        e
                    );
                }
            }
            log::debug!("[Engine] M-SEARCH sent for {}", st);

            tokio::select! {
                _ = engine.cancel.cancelled() => {}
                _ = tokio::time::sleep(engine.config.search_window) => {}
            }
            engine.searches_in_flight.fetch_sub(1, Ordering::SeqCst);
            log::debug!("[Engine] Search window for {} closed", st);
        });
        drop(state);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Background Loops
    // ─────────────────────────────────────────────────────────────────────────

    async fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; SSDP_RECV_BUFFER_SIZE];
        loop {
            let result = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.transport.recv(&mut buf) => result,
            };
            match result {
                Ok((len, from)) => self.handle_datagram(&buf[..len], from).await,
                Err(e) if e.kind() == std::io::ErrorKind::NotConnected => {
                    log::warn!("[Engine] Transport closed, receive loop exiting");
                    break;
                }
                Err(e) => {
                    log::warn!("[Engine] Receive error: {}", e);
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_millis(RECV_ERROR_BACKOFF_MS)) => {}
                    }
                }
            }
        }
        log::debug!("[Engine] Receive loop exited");
    }

    async fn maintenance_loop(self: Arc<Self>) {
        let reannounce = self.config.reannounce_interval();
        let mut ticker = tokio::time::interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let elapsed = self.last_announce.lock().elapsed();
            if elapsed >= reannounce {
                log::debug!("[Engine] Re-announcing after {:?}", elapsed);
                self.announce().await;
            }
            self.expire_stale();
        }
        log::debug!("[Engine] Maintenance loop exited");
    }

    /// Removes devices whose advertised lifetime has elapsed.
    ///
    /// Fires a `Bye` for each removed device and returns how many were removed.
    pub fn expire_stale(&self) -> usize {
        let expired = self.table.remove_expired(now_millis());
        let count = expired.len();
        for record in expired {
            log::info!(
                "[Engine] Device expired: {} (last seen {} ms ago)",
                record.identity,
                now_millis().saturating_sub(record.last_seen)
            );
            self.bus.fire(&SsdpEvent::bye(record.remote_ip, record));
        }
        count
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inbound
    // ─────────────────────────────────────────────────────────────────────────

    /// Decodes and dispatches one datagram. Never fails; problems are logged.
    pub async fn handle_datagram(self: &Arc<Self>, data: &[u8], from: SocketAddr) {
        let message = match SsdpMessage::parse(data) {
            Ok(message) => message,
            Err(e) => {
                log::debug!("[Engine] Dropping datagram from {}: {}", from, e);
                return;
            }
        };

        match (message.method(), message.status()) {
            (Some(method), _) if method.eq_ignore_ascii_case(METHOD_MSEARCH) => {
                self.handle_msearch(&message, from).await
            }
            (Some(method), _) if method.eq_ignore_ascii_case(METHOD_NOTIFY) => {
                self.handle_notify(&message, from.ip())
            }
            (None, Some(200)) => self.handle_search_response(&message, from.ip()),
            _ => log::debug!(
                "[Engine] Unrecognized message from {}: {}",
                from,
                message.start_line
            ),
        }
    }

    async fn handle_msearch(&self, message: &SsdpMessage, from: SocketAddr) {
        let Some(st) = message.header(HEADER_ST).filter(|st| !st.is_empty()) else {
            log::debug!("[Engine] M-SEARCH without ST from {}", from);
            return;
        };

        let matching = self.namespaces.matching(st);
        if matching.is_empty() {
            log::trace!("[Engine] M-SEARCH for {} from {}: no match", st, from);
            return;
        }

        log::debug!(
            "[Engine] M-SEARCH for {} from {}: answering with {} namespace(s)",
            st,
            from,
            matching.len()
        );
        for ns in matching {
            let response = self
                .advertiser
                .search_response(&ns.service_type, &ns.location);
            if let Err(e) = self.transport.unicast(&response.to_bytes(), from).await {
                log::warn!(
                    "[Engine] Failed to answer M-SEARCH from {} for {}: {}",
                    from,
                    ns.service_type,
                    e
                );
            }
        }
    }

    fn handle_notify(self: &Arc<Self>, message: &SsdpMessage, remote_ip: IpAddr) {
        let nts = message.headers.get_or_empty(HEADER_NTS);
        if nts.eq_ignore_ascii_case(NTS_ALIVE) {
            self.handle_alive(message, remote_ip);
        } else if nts.eq_ignore_ascii_case(NTS_BYEBYE) {
            self.handle_byebye(message, remote_ip);
        } else {
            log::debug!("[Engine] NOTIFY from {} with unknown NTS {:?}", remote_ip, nts);
        }
    }

    /// Own traffic looped back through another interface.
    fn is_own(&self, usn: &str) -> bool {
        usn.contains(self.advertiser.uuid.as_str())
    }

    fn handle_alive(self: &Arc<Self>, message: &SsdpMessage, remote_ip: IpAddr) {
        let usn = message.headers.get_or_empty(HEADER_USN);
        if self.is_own(usn) {
            log::trace!("[Engine] Ignoring own alive for {}", usn);
            return;
        }
        let nt = message.headers.get_or_empty(HEADER_NT);
        let Some(key) = root_key(usn, nt) else {
            log::debug!("[Engine] Cannot derive root device from {}={}", nt, usn);
            return;
        };

        if is_root_notification(usn, nt) {
            self.observe_root(message, remote_ip, key);
        } else {
            let max_age = parse_max_age(message.header(HEADER_CACHE_CONTROL));
            if self.table.touch(&key, now_millis(), max_age).is_none() {
                log::trace!("[Engine] {} announced for unknown root {}", nt, key);
            }
        }
    }

    fn handle_byebye(&self, message: &SsdpMessage, remote_ip: IpAddr) {
        let usn = message.headers.get_or_empty(HEADER_USN);
        if usn.is_empty() {
            log::debug!("[Engine] byebye without USN from {}", remote_ip);
            return;
        }
        if self.is_own(usn) {
            log::trace!("[Engine] Ignoring own byebye for {}", usn);
            return;
        }
        let nt = message.headers.get_or_empty(HEADER_NT);
        let key = root_key(usn, nt).unwrap_or_else(|| usn.to_string());

        let record = self.table.get(&key).unwrap_or_else(|| {
            let mut record = DeviceRecord::from_message(message, Some(remote_ip), now_millis());
            record.identity = key.clone();
            record
        });
        self.bus.fire(&SsdpEvent::bye(Some(remote_ip), record));

        // Service and embedded-device byebyes leave the root in place
        if !is_root_notification(usn, nt) {
            log::trace!("[Engine] {} left root {}", nt, key);
            return;
        }
        if self.pending_fetches.remove(&key).is_some() {
            log::debug!("[Engine] {} left before its description arrived", key);
        }
        if self.table.remove(&key).is_some() {
            log::info!("[Engine] Device left: {} ({})", key, remote_ip);
        }
    }

    fn handle_search_response(self: &Arc<Self>, message: &SsdpMessage, remote_ip: IpAddr) {
        let usn = message.headers.get_or_empty(HEADER_USN);
        if self.is_own(usn) {
            log::trace!("[Engine] Ignoring own search response for {}", usn);
            return;
        }
        let st = message.headers.get_or_empty(HEADER_ST);
        let Some(key) = root_key(usn, st) else {
            log::debug!("[Engine] Cannot derive root device from {}={}", st, usn);
            return;
        };
        self.observe_root(message, remote_ip, key);
    }

    /// Refreshes a known root device, or starts fetching an unknown one.
    fn observe_root(self: &Arc<Self>, message: &SsdpMessage, remote_ip: IpAddr, key: String) {
        let now = now_millis();
        let max_age = parse_max_age(message.header(HEADER_CACHE_CONTROL));

        if let Some(record) = self.table.touch(&key, now, max_age) {
            log::trace!("[Engine] Refreshed {}", key);
            self.bus.fire(&SsdpEvent::announce(Some(remote_ip), record));
            return;
        }

        let mut record = DeviceRecord::from_message(message, Some(remote_ip), now);
        record.identity = key;
        self.spawn_fetch(record);
    }

    fn spawn_fetch(self: &Arc<Self>, record: DeviceRecord) {
        if record.location.is_empty() {
            log::warn!(
                "[Engine] {} announced without LOCATION, not adding",
                record.identity
            );
            return;
        }
        if !self.pending_fetches.insert(record.identity.clone()) {
            log::trace!("[Engine] Description for {} already in flight", record.identity);
            return;
        }

        let engine = Arc::clone(self);
        self.spawner.spawn(async move {
            let result = engine.fetcher.fetch(&record.location).await;

            // A byebye during the fetch already claimed the pending entry
            if engine.pending_fetches.remove(&record.identity).is_none() {
                log::debug!(
                    "[Engine] Discarding description of {}, device left meanwhile",
                    record.identity
                );
                return;
            }
            if engine.cancel.is_cancelled() {
                log::debug!(
                    "[Engine] Discarding description of {} fetched after shutdown",
                    record.identity
                );
                return;
            }

            match result {
                Ok(description) => {
                    log::info!(
                        "[Engine] Discovered {} \"{}\" at {}",
                        record.identity,
                        description.friendly_name,
                        record.location
                    );
                    let remote_ip = record.remote_ip;
                    let stored = engine
                        .table
                        .insert_or_refresh(record.with_description(description));
                    engine.bus.fire(&SsdpEvent::announce(remote_ip, stored));
                }
                Err(e) => log::error!(
                    "[Engine] Failed to load description of {} from {}: {}",
                    record.identity,
                    record.location,
                    e
                ),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use tokio::sync::mpsc;

    use super::*;
    use crate::protocol_constants::{
        NS_CONNECTION_MANAGER, NS_CONTENT_DIRECTORY, NS_MEDIA_SERVER, NS_ROOT_DEVICE,
    };
    use crate::ssdp::test_fixtures::{record, MockTransport, Sent, StubFetcher};

    const OWN_UUID: &str = "5c863963-f2a2-491e-8b60-079cdadad147";
    const LOCATION: &str = "http://10.0.0.2:8080/rootDesc.xml";

    fn peer() -> SocketAddr {
        "192.168.1.50:1900".parse().unwrap()
    }

    fn registry() -> NamespaceRegistry {
        let mut reg = NamespaceRegistry::new();
        reg.register(format!("uuid:{}", OWN_UUID), LOCATION);
        reg.register(NS_ROOT_DEVICE, LOCATION);
        reg.register(NS_MEDIA_SERVER, LOCATION);
        reg.register(NS_CONTENT_DIRECTORY, "http://10.0.0.2:8080/cds.xml");
        reg
    }

    struct Harness {
        engine: Arc<DiscoveryEngine>,
        transport: Arc<MockTransport>,
        fetcher: Arc<StubFetcher>,
        events: mpsc::UnboundedReceiver<SsdpEvent>,
    }

    fn harness_with(attachments: usize, fetcher: StubFetcher, config: EngineConfig) -> Harness {
        let transport = Arc::new(MockTransport::new(attachments));
        let fetcher = Arc::new(fetcher);
        let engine = Arc::new(
            DiscoveryEngine::new(
                config,
                registry(),
                transport.clone(),
                fetcher.clone(),
                TokioSpawner::current(),
            )
            .unwrap(),
        );
        let (tx, events) = mpsc::unbounded_channel();
        engine.events().subscribe_fn(move |event| {
            let _ = tx.send(event.clone());
        });
        Harness {
            engine,
            transport,
            fetcher,
            events,
        }
    }

    fn harness() -> Harness {
        harness_with(
            1,
            StubFetcher::ok(),
            EngineConfig::new(OWN_UUID, "239.255.255.250:1900"),
        )
    }

    fn notify(nts: &str, nt: &str, usn: &str) -> String {
        format!(
            "NOTIFY * HTTP/1.1\r\n\
             HOST: 239.255.255.250:1900\r\n\
             CACHE-CONTROL: max-age=1800\r\n\
             LOCATION: http://192.168.1.50:49152/desc.xml\r\n\
             NT: {}\r\n\
             NTS: {}\r\n\
             SERVER: Linux UPnP/1.0 Test/1.0\r\n\
             USN: {}\r\n\r\n",
            nt, nts, usn
        )
    }

    fn search_response(st: &str, usn: &str) -> String {
        format!(
            "HTTP/1.1 200 OK\r\n\
             Cache-Control: max-age=900\r\n\
             Location: http://192.168.1.50:49152/desc.xml\r\n\
             St: {}\r\n\
             Server: Linux UPnP/1.0 Test/1.0\r\n\
             Usn: {}\r\n\r\n",
            st, usn
        )
    }

    fn msearch(st: &str) -> String {
        format!(
            "M-SEARCH * HTTP/1.1\r\n\
             HOST: 239.255.255.250:1900\r\n\
             MAN: \"ssdp:discover\"\r\n\
             MX: 2\r\n\
             ST: {}\r\n\r\n",
            st
        )
    }

    /// Waits until all detached description fetches have completed.
    async fn settle(engine: &DiscoveryEngine) {
        for _ in 0..100 {
            tokio::task::yield_now().await;
            if engine.pending_fetch_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        tokio::task::yield_now().await;
    }

    /// Waits until the fetcher has been entered `n` times.
    async fn wait_for_calls(fetcher: &StubFetcher, n: usize) {
        for _ in 0..100 {
            if fetcher.calls() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("fetcher reached {} call(s), expected {}", fetcher.calls(), n);
    }

    fn gated_harness() -> Harness {
        harness_with(
            1,
            StubFetcher::gated(),
            EngineConfig::new(OWN_UUID, "239.255.255.250:1900"),
        )
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<SsdpEvent>) -> SsdpEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    #[test]
    fn empty_uuid_is_rejected() {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let _guard = rt.enter();
        let result = DiscoveryEngine::new(
            EngineConfig::new("uuid:", "239.255.255.250:1900"),
            registry(),
            Arc::new(MockTransport::new(1)),
            Arc::new(StubFetcher::ok()),
            TokioSpawner::current(),
        );
        assert_eq!(result.err(), Some(EngineError::MissingUuid));
    }

    #[tokio::test]
    async fn own_traffic_is_suppressed() {
        let mut h = harness();
        let own_root = format!("uuid:{}::upnp:rootdevice", OWN_UUID);

        h.engine
            .handle_datagram(notify(NTS_ALIVE, NS_ROOT_DEVICE, &own_root).as_bytes(), peer())
            .await;
        h.engine
            .handle_datagram(notify(NTS_BYEBYE, NS_ROOT_DEVICE, &own_root).as_bytes(), peer())
            .await;
        h.engine
            .handle_datagram(search_response(NS_ROOT_DEVICE, &own_root).as_bytes(), peer())
            .await;
        settle(&h.engine).await;

        assert_eq!(h.engine.device_count(), 0);
        assert_eq!(h.fetcher.calls(), 0);
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn msearch_for_rootdevice_answers_every_namespace() {
        let h = harness();
        h.engine
            .handle_datagram(msearch(NS_ROOT_DEVICE).as_bytes(), peer())
            .await;

        let sent = h.transport.sent();
        assert_eq!(sent.len(), 4);
        for (sent, ns) in sent.iter().zip(h.engine.namespaces().iter()) {
            let Sent::Unicast { dest, message } = sent else {
                panic!("expected unicast, got {:?}", sent);
            };
            assert_eq!(*dest, peer());
            assert_eq!(message.status(), Some(200));
            assert_eq!(message.header("LOCATION"), Some(ns.location.as_str()));
            assert_eq!(message.header("ST"), Some(ns.service_type.as_str()));
        }
    }

    #[tokio::test]
    async fn msearch_matching_rules() {
        let h = harness();
        h.engine
            .handle_datagram(msearch("ssdp:all").as_bytes(), peer())
            .await;
        assert_eq!(h.transport.sent().len(), 4);

        h.transport.clear();
        h.engine
            .handle_datagram(msearch(NS_CONTENT_DIRECTORY).as_bytes(), peer())
            .await;
        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].message().header("LOCATION"),
            Some("http://10.0.0.2:8080/cds.xml")
        );

        h.transport.clear();
        h.engine
            .handle_datagram(msearch(NS_CONNECTION_MANAGER).as_bytes(), peer())
            .await;
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn new_root_device_is_fetched_and_announced() {
        let mut h = harness();
        h.engine
            .handle_datagram(
                notify(NTS_ALIVE, NS_ROOT_DEVICE, "uuid:ABC::upnp:rootdevice").as_bytes(),
                peer(),
            )
            .await;

        let event = next_event(&mut h.events).await;
        assert!(event.is_announce());
        assert_eq!(event.identity(), "uuid:ABC");
        assert!(event.record().description.is_some());

        let stored = h.engine.device("uuid:ABC").unwrap();
        assert_eq!(stored.cache_control, 1800);
        assert_eq!(stored.remote_ip, Some(peer().ip()));
        assert_eq!(h.fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn known_root_device_is_refreshed_without_fetch() {
        let mut h = harness();
        h.engine.table().upsert(record("uuid:ABC", 1, 60));

        h.engine
            .handle_datagram(
                notify(NTS_ALIVE, NS_ROOT_DEVICE, "uuid:ABC::upnp:rootdevice").as_bytes(),
                peer(),
            )
            .await;

        let event = next_event(&mut h.events).await;
        assert!(event.is_announce());
        let stored = h.engine.device("uuid:ABC").unwrap();
        assert!(stored.last_seen > 1);
        assert_eq!(stored.cache_control, 1800);
        assert_eq!(h.fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn sub_device_alive_only_touches_known_roots() {
        let mut h = harness();
        let usn = format!("uuid:ABC::{}", NS_CONTENT_DIRECTORY);

        h.engine
            .handle_datagram(notify(NTS_ALIVE, NS_CONTENT_DIRECTORY, &usn).as_bytes(), peer())
            .await;
        settle(&h.engine).await;
        assert_eq!(h.engine.device_count(), 0);
        assert_eq!(h.fetcher.calls(), 0);

        h.engine.table().upsert(record("uuid:ABC", 1, 60));
        h.engine
            .handle_datagram(notify(NTS_ALIVE, NS_CONTENT_DIRECTORY, &usn).as_bytes(), peer())
            .await;
        assert!(h.engine.device("uuid:ABC").unwrap().last_seen > 1);
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn byebye_is_idempotent() {
        let mut h = harness();
        h.engine.table().upsert(record("uuid:ABC", 1, 1800));
        let bye = notify(NTS_BYEBYE, NS_ROOT_DEVICE, "uuid:ABC::upnp:rootdevice");

        h.engine.handle_datagram(bye.as_bytes(), peer()).await;
        assert!(h.engine.device("uuid:ABC").is_none());
        let event = next_event(&mut h.events).await;
        assert!(!event.is_announce());
        assert_eq!(event.identity(), "uuid:ABC");

        h.engine.handle_datagram(bye.as_bytes(), peer()).await;
        assert_eq!(h.engine.device_count(), 0);
    }

    #[tokio::test]
    async fn service_byebye_keeps_root_device() {
        let mut h = harness();
        h.engine.table().upsert(record("uuid:ABC", 1, 1800));
        let usn = format!("uuid:ABC::{}", NS_CONTENT_DIRECTORY);

        h.engine
            .handle_datagram(notify(NTS_BYEBYE, NS_CONTENT_DIRECTORY, &usn).as_bytes(), peer())
            .await;

        let event = next_event(&mut h.events).await;
        assert!(!event.is_announce());
        assert_eq!(event.identity(), "uuid:ABC");
        assert!(h.engine.device("uuid:ABC").is_some());
    }

    #[tokio::test]
    async fn byebye_during_description_fetch_drops_the_device() {
        let mut h = gated_harness();
        let root = "uuid:ABC::upnp:rootdevice";

        h.engine
            .handle_datagram(notify(NTS_ALIVE, NS_ROOT_DEVICE, root).as_bytes(), peer())
            .await;
        wait_for_calls(&h.fetcher, 1).await;

        h.engine
            .handle_datagram(notify(NTS_BYEBYE, NS_ROOT_DEVICE, root).as_bytes(), peer())
            .await;
        let bye = next_event(&mut h.events).await;
        assert!(!bye.is_announce());
        assert_eq!(h.engine.pending_fetch_count(), 0);

        h.fetcher.release(1);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(h.engine.device("uuid:ABC").is_none());
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn concurrent_announcements_share_one_fetch() {
        let mut h = gated_harness();
        let alive = notify(NTS_ALIVE, NS_ROOT_DEVICE, "uuid:ABC::upnp:rootdevice");

        h.engine.handle_datagram(alive.as_bytes(), peer()).await;
        h.engine.handle_datagram(alive.as_bytes(), peer()).await;
        h.engine
            .handle_datagram(
                search_response(NS_ROOT_DEVICE, "uuid:ABC::upnp:rootdevice").as_bytes(),
                peer(),
            )
            .await;
        wait_for_calls(&h.fetcher, 1).await;
        assert_eq!(h.engine.pending_fetch_count(), 1);

        h.fetcher.release(3);
        let event = next_event(&mut h.events).await;
        assert!(event.is_announce());
        settle(&h.engine).await;

        assert_eq!(h.fetcher.calls(), 1);
        assert_eq!(h.engine.device_count(), 1);
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn description_arriving_after_stop_is_discarded() {
        let mut h = gated_harness();
        h.engine.start().unwrap();
        h.engine
            .handle_datagram(
                notify(NTS_ALIVE, NS_ROOT_DEVICE, "uuid:ABC::upnp:rootdevice").as_bytes(),
                peer(),
            )
            .await;
        wait_for_calls(&h.fetcher, 1).await;

        h.engine.stop().await;
        h.fetcher.release(1);
        settle(&h.engine).await;

        assert_eq!(h.engine.pending_fetch_count(), 0);
        assert_eq!(h.engine.device_count(), 0);
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn search_response_always_announces() {
        let mut h = harness();
        let usn = format!("uuid:XYZ::{}", NS_CONTENT_DIRECTORY);

        h.engine
            .handle_datagram(search_response(NS_CONTENT_DIRECTORY, &usn).as_bytes(), peer())
            .await;
        let first = next_event(&mut h.events).await;
        assert_eq!(first.identity(), "uuid:XYZ");
        assert_eq!(first.record().cache_control, 900);

        h.engine
            .handle_datagram(search_response(NS_CONTENT_DIRECTORY, &usn).as_bytes(), peer())
            .await;
        let second = next_event(&mut h.events).await;
        assert!(second.is_announce());
        assert_eq!(h.fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn failed_description_fetch_does_not_add_device() {
        let mut h = harness_with(
            1,
            StubFetcher::failing(),
            EngineConfig::new(OWN_UUID, "239.255.255.250:1900"),
        );
        h.engine
            .handle_datagram(
                notify(NTS_ALIVE, NS_ROOT_DEVICE, "uuid:ABC::upnp:rootdevice").as_bytes(),
                peer(),
            )
            .await;
        settle(&h.engine).await;

        assert_eq!(h.fetcher.calls(), 1);
        assert_eq!(h.engine.device_count(), 0);
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn malformed_and_unknown_messages_are_ignored() {
        let mut h = harness();
        h.engine.handle_datagram(b"\xff\xfe garbage", peer()).await;
        h.engine
            .handle_datagram(b"SUBSCRIBE /x HTTP/1.1\r\n\r\n", peer())
            .await;
        h.engine
            .handle_datagram(b"HTTP/1.1 404 Not Found\r\n\r\n", peer())
            .await;
        assert!(h.transport.sent().is_empty());
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn expire_stale_removes_and_reports() {
        let mut h = harness();
        let now = now_millis();
        h.engine.table().upsert(record("uuid:old", now - 1_000_000, 10));
        h.engine
            .table()
            .upsert(record("uuid:fresh", now - 1_000_000, 10_000));

        assert_eq!(h.engine.expire_stale(), 1);
        assert!(h.engine.device("uuid:old").is_none());
        assert!(h.engine.device("uuid:fresh").is_some());

        let event = next_event(&mut h.events).await;
        assert!(!event.is_announce());
        assert_eq!(event.identity(), "uuid:old");
    }

    #[tokio::test]
    async fn announce_then_stop_ends_with_full_suppress() {
        let h = harness_with(
            2,
            StubFetcher::ok(),
            EngineConfig::new(OWN_UUID, "239.255.255.250:1900"),
        );
        h.engine.start().unwrap();
        h.engine.announce().await;
        h.engine.stop().await;

        assert!(!h.engine.is_running());
        assert!(h.transport.is_closed());
        assert!(h.engine.tasks.is_empty());

        let sent = h.transport.sent();
        let per_cycle = 2 * h.engine.namespaces().len();
        assert_eq!(sent.len(), 3 * per_cycle);

        let alive = sent.iter().filter(|s| s.nts() == Some(NTS_ALIVE)).count();
        assert_eq!(alive, per_cycle);

        let tail = &sent[sent.len() - per_cycle..];
        let mut covered = HashSet::new();
        for s in tail {
            let Sent::Multicast {
                attachment,
                message,
            } = s
            else {
                panic!("expected multicast");
            };
            assert_eq!(message.header("NTS"), Some(NTS_BYEBYE));
            covered.insert((*attachment, message.header("NT").unwrap().to_string()));
        }
        assert_eq!(covered.len(), per_cycle);
    }

    #[tokio::test]
    async fn send_failures_do_not_abort_the_batch() {
        let h = harness();
        h.transport.fail_next_sends(2);
        h.engine.suppress().await;
        assert_eq!(h.transport.sent().len(), h.engine.namespaces().len() - 2);
    }

    #[tokio::test]
    async fn start_twice_and_after_stop_are_errors() {
        let h = harness();
        h.engine.start().unwrap();
        assert_eq!(h.engine.start(), Err(EngineError::AlreadyRunning));
        h.engine.stop().await;
        h.engine.stop().await;
        assert_eq!(h.engine.start(), Err(EngineError::Stopped));
    }

    #[tokio::test]
    async fn receive_loop_dispatches_datagrams() {
        let mut h = harness();
        h.engine.table().upsert(record("uuid:ABC", 1, 1800));
        h.engine.start().unwrap();

        h.transport.inject(
            &notify(NTS_BYEBYE, NS_ROOT_DEVICE, "uuid:ABC::upnp:rootdevice"),
            peer(),
        );
        let event = next_event(&mut h.events).await;
        assert_eq!(event.identity(), "uuid:ABC");

        h.engine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn maintenance_loop_reannounces_after_a_third_of_max_age() {
        let mut config = EngineConfig::new(OWN_UUID, "239.255.255.250:1900");
        config.max_age_secs = 30;
        let h = harness_with(1, StubFetcher::ok(), config);
        h.engine.start().unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(h.transport.sent().is_empty());

        tokio::time::sleep(Duration::from_secs(6)).await;
        let alive = h
            .transport
            .sent()
            .iter()
            .filter(|s| s.nts() == Some(NTS_ALIVE))
            .count();
        assert_eq!(alive, h.engine.namespaces().len());

        h.engine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn search_is_fire_and_forget() {
        let h = harness_with(
            2,
            StubFetcher::ok(),
            EngineConfig::new(OWN_UUID, "239.255.255.250:1900"),
        );
        h.engine.search("ssdp:all");
        assert_eq!(h.engine.searches_in_flight(), 1);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let sent = h.transport.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent
            .iter()
            .all(|s| s.message().method() == Some("M-SEARCH")
                && s.message().header("ST") == Some("ssdp:all")));

        tokio::time::sleep(Duration::from_secs(21)).await;
        assert_eq!(h.engine.searches_in_flight(), 0);
    }

    #[tokio::test]
    async fn stop_cuts_search_window_short() {
        let h = harness();
        h.engine.search(NS_ROOT_DEVICE);
        h.engine.stop().await;
        assert_eq!(h.engine.searches_in_flight(), 0);

        h.engine.search(NS_ROOT_DEVICE);
        assert_eq!(h.engine.searches_in_flight(), 0);
        assert!(h.engine.tasks.is_empty());
    }
}
