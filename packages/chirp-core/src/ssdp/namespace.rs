//! Advertised namespaces of this server.

use serde::Serialize;

use crate::protocol_constants::{NS_ROOT_DEVICE, ST_ALL};

/// One advertised service type and the description URL it points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Namespace {
    pub service_type: String,
    pub location: String,
}

/// Namespaces this server announces and answers searches for.
///
/// Filled during startup, then moved into the discovery engine, which only
/// reads it.
#[derive(Debug, Clone, Default)]
pub struct NamespaceRegistry {
    entries: Vec<Namespace>,
}

impl NamespaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `service_type`, replacing the location if already present.
    pub fn register(&mut self, service_type: impl Into<String>, location: impl Into<String>) {
        let service_type = service_type.into();
        let location = location.into();
        match self
            .entries
            .iter_mut()
            .find(|ns| ns.service_type == service_type)
        {
            Some(existing) => existing.location = location,
            None => self.entries.push(Namespace {
                service_type,
                location,
            }),
        }
    }

    #[must_use]
    pub fn lookup(&self, service_type: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|ns| ns.service_type == service_type)
            .map(|ns| ns.location.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Namespace> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Namespaces an M-SEARCH for `st` should be answered with.
    ///
    /// `ssdp:all` and `upnp:rootdevice` return every namespace; any other
    /// target returns its exact match, if registered.
    #[must_use]
    pub fn matching(&self, st: &str) -> Vec<&Namespace> {
        if st == ST_ALL || st == NS_ROOT_DEVICE {
            return self.entries.iter().collect();
        }
        self.entries
            .iter()
            .filter(|ns| ns.service_type == st)
            .collect()
    }
}
