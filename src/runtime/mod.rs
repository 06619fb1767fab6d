use std::collections::BTreeSet;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::RuntimeError;
use crate::types::{ContainerEvent, ContainerRecord};

pub mod docker;
pub use docker::DockerRuntime;

#[cfg(test)]
pub mod fake;

/// Lifecycle events, already parsed. Malformed payloads surface as
/// `RuntimeError::MalformedEvent` items without ending the stream.
pub type EventStream = BoxStream<'static, Result<ContainerEvent, RuntimeError>>;

/// The container daemon, as seen by bootstrap and the synchronizer.
///
/// Implementations build [`ContainerRecord`]s with the same construction
/// logic for listings and single-container inspection.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Cheap liveness check, used to detect a half-open event stream.
    async fn ping(&self) -> Result<(), RuntimeError>;

    /// Names of the daemon's bridge-driver networks.
    async fn bridge_networks(&self) -> Result<BTreeSet<String>, RuntimeError>;

    /// Every container the daemon reports as running.
    async fn list_running(&self) -> Result<Vec<ContainerRecord>, RuntimeError>;

    /// Current record for one container, or `None` if it no longer exists.
    /// An exited container comes back in the `Removed` state.
    async fn inspect(&self, container_id: &str) -> Result<Option<ContainerRecord>, RuntimeError>;

    /// Subscribe to lifecycle events. The stream must include everything
    /// from the moment of this call, even if it is first polled later.
    async fn events(&self) -> Result<EventStream, RuntimeError>;
}
