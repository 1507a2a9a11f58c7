//! Event handler abstraction.
//!
//! Consumers of discovery events implement [`EventHandler`] (or pass a
//! closure) and register it on the [`EventBus`](super::EventBus).

use super::SsdpEvent;

/// Receives events fired by the discovery engine.
///
/// Handlers run synchronously on the task that fired the event, usually the
/// SSDP receive loop. A handler that blocks stalls discovery, so hand long
/// work off to a channel or a spawned task.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &SsdpEvent);
}

impl<F> EventHandler for F
where
    F: Fn(&SsdpEvent) + Send + Sync,
{
    fn on_event(&self, event: &SsdpEvent) {
        self(event)
    }
}

/// Logs every event at debug level.
pub struct LoggingEventHandler;

impl EventHandler for LoggingEventHandler {
    fn on_event(&self, event: &SsdpEvent) {
        match event {
            SsdpEvent::Announce { .. } => tracing::debug!(?event, "ssdp_announce"),
            SsdpEvent::Bye { .. } => tracing::debug!(?event, "ssdp_bye"),
        }
    }
}
