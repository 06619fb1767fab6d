//! Data structures used throughout the dockname daemon.
//!
//! A [`ContainerRecord`] is what we know about one live container.  The
//! registry derives [`ResolvedBinding`]s from records; they are never
//! mutated on their own.  [`ContainerEvent`] is the closed set of
//! lifecycle events the synchronizer understands, parsed from the raw
//! daemon payloads at the runtime boundary.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

/// Lifecycle state of a tracked container.
///
/// `Removed` is terminal and never stored: removing a container deletes
/// its record rather than marking it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Starting,
    Running,
    Stopping,
    Removed,
}

impl ContainerState {
    /// Only running containers publish bindings.
    pub fn is_publishable(self) -> bool {
        matches!(self, ContainerState::Running)
    }
}

/// One observed container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRecord {
    pub container_id: String,
    /// Candidate hostnames, already normalised by the name policy.
    pub names: BTreeSet<String>,
    /// Network name → the container's address on that network.
    pub networks: BTreeMap<String, IpAddr>,
    pub state: ContainerState,
}

#[cfg(test)]
impl ContainerRecord {
    pub fn new(container_id: impl Into<String>, state: ContainerState) -> Self {
        Self {
            container_id: container_id.into(),
            names: BTreeSet::new(),
            networks: BTreeMap::new(),
            state,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.names.insert(name.into());
        self
    }

    pub fn with_network(mut self, network: impl Into<String>, addr: IpAddr) -> Self {
        self.networks.insert(network.into(), addr);
        self
    }
}

/// The published hostname → address entry answered to DNS clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBinding {
    pub hostname: String,
    pub address: IpAddr,
    /// Back-reference to the owning record.
    pub source_container_id: String,
}

/// A container lifecycle event, parsed from the daemon's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerEvent {
    Create { container_id: String },
    Start { container_id: String },
    NetworkConnect { container_id: String, network: String },
    NetworkDisconnect { container_id: String, network: String },
    /// `signal` as reported by the daemon, usually numeric ("15").
    Kill {
        container_id: String,
        signal: Option<String>,
    },
    Die { container_id: String },
    Destroy { container_id: String },
}

impl ContainerEvent {
    pub fn container_id(&self) -> &str {
        match self {
            ContainerEvent::Create { container_id }
            | ContainerEvent::Start { container_id }
            | ContainerEvent::NetworkConnect { container_id, .. }
            | ContainerEvent::NetworkDisconnect { container_id, .. }
            | ContainerEvent::Kill { container_id, .. }
            | ContainerEvent::Die { container_id }
            | ContainerEvent::Destroy { container_id } => container_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ContainerEvent::Create { .. } => "create",
            ContainerEvent::Start { .. } => "start",
            ContainerEvent::NetworkConnect { .. } => "network-connect",
            ContainerEvent::NetworkDisconnect { .. } => "network-disconnect",
            ContainerEvent::Kill { .. } => "kill",
            ContainerEvent::Die { .. } => "die",
            ContainerEvent::Destroy { .. } => "destroy",
        }
    }
}
