//! Initial registry fill from the containers already running.

use std::time::Duration;

use log::{debug, error, info};
use tokio::sync::watch;
use tokio::time::sleep;

use crate::backoff::Backoff;
use crate::error::RuntimeError;
use crate::registry::NameRegistry;
use crate::runtime::ContainerRuntime;
use crate::sync::shutdown_requested;

/// List running containers and bulk-insert them. Returns how many records
/// were stored.
pub async fn load(
    runtime: &dyn ContainerRuntime,
    registry: &NameRegistry,
) -> Result<usize, RuntimeError> {
    let bridges = runtime.bridge_networks().await?;
    let running = runtime.list_running().await?;
    registry.set_bridge_networks(bridges);
    Ok(registry.upsert_all(running))
}

/// Retry [`load`] until it succeeds. Returns `None` if shutdown was
/// requested first.
pub async fn load_until_ready(
    runtime: &dyn ContainerRuntime,
    registry: &NameRegistry,
    max_backoff: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<usize> {
    let mut backoff = Backoff::new(max_backoff);
    loop {
        match load(runtime, registry).await {
            Ok(count) => {
                info!(
                    "Initial scan found {} containers, {} names",
                    count,
                    registry.bindings_count()
                );
                debug!("Initial bindings: {:?}", registry.snapshot());
                return Some(count);
            }
            Err(e) => {
                let delay = backoff.next_delay();
                error!("Failed initial scan: {}. Retrying in {:?}...", e, delay);
                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = shutdown_requested(shutdown) => return None,
                }
            }
        }
    }
}
