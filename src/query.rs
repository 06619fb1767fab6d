//! The lookup surface the DNS handler calls.

use std::net::IpAddr;

use crate::registry::NameRegistry;

/// Read-only view of the registry for query serving. Never waits on the
/// synchronizer beyond a single registry update.
#[derive(Debug, Clone)]
pub struct QueryAdapter {
    registry: NameRegistry,
}

impl QueryAdapter {
    pub fn new(registry: NameRegistry) -> Self {
        Self { registry }
    }

    /// Address for an already-normalised hostname, or `None` for
    /// not-found.
    pub fn answer(&self, hostname: &str) -> Option<IpAddr> {
        self.registry.lookup(hostname)
    }
}
