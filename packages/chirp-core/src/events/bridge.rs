//! Bridge from the synchronous event bus to async consumers.
//!
//! The [`BroadcastEventBridge`] is registered as an ordinary bus subscriber
//! and forwards every event into a `tokio::sync::broadcast` channel that the
//! live-update HTTP endpoint reads from.

use tokio::sync::broadcast;

use super::{EventHandler, SsdpEvent};

/// Forwards bus events to a broadcast channel.
///
/// Sending never blocks: a receiver that falls behind sees `Lagged` rather
/// than slowing down the discovery engine.
#[derive(Clone)]
pub struct BroadcastEventBridge {
    tx: broadcast::Sender<SsdpEvent>,
}

impl BroadcastEventBridge {
    /// Creates a new bridge with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Returns a new receiver for the broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<SsdpEvent> {
        self.tx.subscribe()
    }

    /// Number of live receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventHandler for BroadcastEventBridge {
    fn on_event(&self, event: &SsdpEvent) {
        if let Err(e) = self.tx.send(event.clone()) {
            log::trace!("[EventBridge] No broadcast receivers: {}", e);
        }
    }
}
