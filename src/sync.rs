//! Event synchronizer.
//!
//! Keeps the registry in step with the daemon: consumes lifecycle events,
//! runs a full reconciliation on every (re)connect and on a timer, and
//! detects half-open event streams by pinging the daemon after a quiet
//! period. Runs as one supervised task; its connection state is published
//! on a watch channel.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

use crate::backoff::Backoff;
use crate::error::RuntimeError;
use crate::registry::{NameRegistry, ReconcileReport};
use crate::runtime::{ContainerRuntime, EventStream};
use crate::types::{ContainerEvent, ContainerState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Connecting,
    Connected,
    Reconnecting,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub reconcile_interval: Duration,
    pub idle_timeout: Duration,
    pub max_backoff: Duration,
}

enum StreamEnd {
    Shutdown,
    Disconnected,
}

pub struct EventSynchronizer {
    runtime: Arc<dyn ContainerRuntime>,
    registry: NameRegistry,
    config: SyncConfig,
    state_tx: watch::Sender<SyncState>,
}

/// Resolves once shutdown is requested. A dropped sender counts as a
/// request.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Signals that end a process unless it handles them: INT, QUIT, KILL and
/// TERM, by number or name.
fn is_stop_signal(signal: &str) -> bool {
    let signal = signal.to_ascii_uppercase();
    matches!(
        signal.trim_start_matches("SIG"),
        "2" | "3" | "9" | "15" | "INT" | "QUIT" | "KILL" | "TERM"
    )
}

impl EventSynchronizer {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        registry: NameRegistry,
        config: SyncConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(SyncState::Connecting);
        Self {
            runtime,
            registry,
            config,
            state_tx,
        }
    }

    pub fn state(&self) -> watch::Receiver<SyncState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: SyncState) {
        self.state_tx.send_replace(state);
    }

    /// Run until shutdown is requested. Daemon failures are retried forever.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = Backoff::new(self.config.max_backoff);

        loop {
            if *shutdown.borrow() {
                break;
            }

            // Subscribe before reconciling: the stream starts at this point,
            // so nothing falls between the two.
            let stream = match self.runtime.events().await {
                Ok(stream) => stream,
                Err(e) => {
                    let delay = backoff.next_delay();
                    error!(
                        "Failed to subscribe to Docker events: {}. Retrying in {:?}...",
                        e, delay
                    );
                    self.set_state(SyncState::Reconnecting);
                    if self.pause(delay, &mut shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            if let Err(e) = self.reconcile().await {
                let delay = backoff.next_delay();
                error!("Reconciliation failed: {}. Retrying in {:?}...", e, delay);
                self.set_state(SyncState::Reconnecting);
                if self.pause(delay, &mut shutdown).await {
                    break;
                }
                continue;
            }

            backoff.reset();
            self.set_state(SyncState::Connected);
            info!("Listening for Docker events...");

            match self.consume(stream, &mut shutdown).await {
                StreamEnd::Shutdown => break,
                StreamEnd::Disconnected => {
                    let delay = backoff.next_delay();
                    warn!("Docker event stream lost. Reconnecting in {:?}...", delay);
                    self.set_state(SyncState::Reconnecting);
                    if self.pause(delay, &mut shutdown).await {
                        break;
                    }
                }
            }
        }

        self.set_state(SyncState::Stopped);
        info!("Event synchronizer stopped");
    }

    /// Sleep for `delay` unless shutdown comes first. Returns `true` on
    /// shutdown.
    async fn pause(&self, delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = sleep(delay) => false,
            _ = shutdown_requested(shutdown) => true,
        }
    }

    async fn consume(
        &self,
        mut stream: EventStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> StreamEnd {
        let period = self.config.reconcile_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let idle = sleep(self.config.idle_timeout);
        tokio::pin!(idle);

        // Work inside each arm runs to completion: shutdown is only
        // observed between events and reconciliation passes.
        loop {
            tokio::select! {
                biased;

                _ = shutdown_requested(shutdown) => {
                    info!("Event synchronizer received shutdown signal");
                    return StreamEnd::Shutdown;
                }

                _ = ticker.tick() => {
                    if let Err(e) = self.reconcile().await {
                        warn!("Periodic reconciliation failed: {}", e);
                        return StreamEnd::Disconnected;
                    }
                }

                item = stream.next() => {
                    idle.as_mut().reset(Instant::now() + self.config.idle_timeout);
                    match item {
                        Some(Ok(event)) => {
                            if let Err(e) = self.apply(event).await {
                                warn!("Failed to apply event: {}", e);
                                return StreamEnd::Disconnected;
                            }
                        }
                        Some(Err(RuntimeError::MalformedEvent(msg))) => {
                            warn!("Skipping malformed event: {}", msg);
                        }
                        Some(Err(e)) => {
                            error!("Error in Docker event stream: {}", e);
                            return StreamEnd::Disconnected;
                        }
                        None => {
                            warn!("Docker event stream ended");
                            return StreamEnd::Disconnected;
                        }
                    }
                }

                _ = &mut idle => {
                    match self.runtime.ping().await {
                        Ok(()) => {
                            debug!(
                                "No events for {:?}, daemon still answering",
                                self.config.idle_timeout
                            );
                            idle.as_mut().reset(Instant::now() + self.config.idle_timeout);
                        }
                        Err(e) => {
                            warn!("Docker daemon stopped answering: {}", e);
                            return StreamEnd::Disconnected;
                        }
                    }
                }
            }
        }
    }

    /// Apply one lifecycle event. Events are applied one at a time, so
    /// events for the same container keep their delivery order.
    pub async fn apply(&self, event: ContainerEvent) -> Result<(), RuntimeError> {
        debug!("Container event: {} for {}", event.kind(), event.container_id());

        match event {
            ContainerEvent::Create { container_id }
            | ContainerEvent::Start { container_id }
            | ContainerEvent::NetworkConnect { container_id, .. }
            | ContainerEvent::NetworkDisconnect { container_id, .. } => {
                self.refresh(&container_id).await?;
            }
            ContainerEvent::Kill {
                container_id,
                signal,
            } => {
                if signal.as_deref().is_some_and(is_stop_signal) {
                    if let Some(mut record) = self.registry.get(&container_id) {
                        record.state = ContainerState::Stopping;
                        self.registry.upsert(record);
                    }
                } else {
                    // Reload signals and the like leave the container running.
                    self.refresh(&container_id).await?;
                }
            }
            ContainerEvent::Die { container_id } | ContainerEvent::Destroy { container_id } => {
                if self.registry.remove(&container_id).is_some() {
                    info!("Container stopped: {}", container_id);
                }
            }
        }
        Ok(())
    }

    /// Re-read one container from the daemon and store what we find.
    async fn refresh(&self, container_id: &str) -> Result<(), RuntimeError> {
        match self.runtime.inspect(container_id).await? {
            Some(record) => self.registry.upsert(record),
            None => {
                self.registry.remove(container_id);
            }
        }
        Ok(())
    }

    /// Diff the daemon's running set against the registry and fix drift.
    pub async fn reconcile(&self) -> Result<ReconcileReport, RuntimeError> {
        let bridges = self.runtime.bridge_networks().await?;
        let running = self.runtime.list_running().await?;
        let report = self.registry.reconcile(bridges, running);
        if report.is_empty() {
            debug!("Reconciliation found no drift");
        } else {
            info!(
                "Reconciliation removed {:?}, updated {:?}",
                report.removed, report.upserted
            );
        }
        Ok(report)
    }
}
