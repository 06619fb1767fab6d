//! In-memory runtime for driving bootstrap and the synchronizer in tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{ContainerRuntime, EventStream};
use crate::address::DEFAULT_BRIDGE;
use crate::error::RuntimeError;
use crate::types::{ContainerEvent, ContainerRecord, ContainerState};

pub type EventSender = mpsc::UnboundedSender<Result<ContainerEvent, RuntimeError>>;

pub fn unreachable() -> RuntimeError {
    RuntimeError::DaemonUnreachable(bollard::errors::Error::DockerResponseServerError {
        status_code: 500,
        message: "daemon down".into(),
    })
}

/// Daemon calls in the order they happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Subscribe,
    List,
    /// First poll of a subscribed stream.
    Poll,
}

#[derive(Default)]
struct FakeState {
    containers: BTreeMap<String, ContainerRecord>,
    bridges: BTreeSet<String>,
    down: bool,
    streams: VecDeque<mpsc::UnboundedReceiver<Result<ContainerEvent, RuntimeError>>>,
    calls: Vec<Call>,
    /// Container that starts right after the next listing is taken.
    start_after_listing: Option<(ContainerRecord, EventSender)>,
}

pub struct FakeRuntime {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                bridges: BTreeSet::from([DEFAULT_BRIDGE.to_string()]),
                ..Default::default()
            })),
        }
    }

    /// Put a container on the fake daemon (any state).
    pub fn put(&self, record: ContainerRecord) {
        let mut state = self.state.lock();
        state.containers.insert(record.container_id.clone(), record);
    }

    pub fn delete(&self, container_id: &str) {
        self.state.lock().containers.remove(container_id);
    }

    pub fn set_bridges(&self, bridges: &[&str]) {
        self.state.lock().bridges = bridges.iter().map(|b| b.to_string()).collect();
    }

    pub fn set_down(&self, down: bool) {
        self.state.lock().down = down;
    }

    /// Queue an event stream for the next subscription. Dropping the
    /// returned sender ends that stream.
    pub fn push_stream(&self) -> EventSender {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().streams.push_back(rx);
        tx
    }

    /// Start `record` just after the next listing is taken, announcing it
    /// on `events`. The listing itself does not include it.
    pub fn start_after_next_listing(&self, record: ContainerRecord, events: EventSender) {
        self.state.lock().start_after_listing = Some((record, events));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn subscriptions(&self) -> usize {
        self.count(Call::Subscribe)
    }

    pub fn listings(&self) -> usize {
        self.count(Call::List)
    }

    fn count(&self, call: Call) -> usize {
        self.state.lock().calls.iter().filter(|c| **c == call).count()
    }

    fn check_up(&self) -> Result<(), RuntimeError> {
        if self.state.lock().down {
            Err(unreachable())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        self.check_up()
    }

    async fn bridge_networks(&self) -> Result<BTreeSet<String>, RuntimeError> {
        self.check_up()?;
        Ok(self.state.lock().bridges.clone())
    }

    async fn list_running(&self) -> Result<Vec<ContainerRecord>, RuntimeError> {
        self.check_up()?;
        let mut state = self.state.lock();
        state.calls.push(Call::List);
        let listing = state
            .containers
            .values()
            .filter(|r| r.state == ContainerState::Running)
            .cloned()
            .collect();

        if let Some((record, events)) = state.start_after_listing.take() {
            let container_id = record.container_id.clone();
            state.containers.insert(container_id.clone(), record);
            let _ = events.send(Ok(ContainerEvent::Start { container_id }));
        }
        Ok(listing)
    }

    async fn inspect(&self, container_id: &str) -> Result<Option<ContainerRecord>, RuntimeError> {
        self.check_up()?;
        Ok(self.state.lock().containers.get(container_id).cloned())
    }

    async fn events(&self) -> Result<EventStream, RuntimeError> {
        self.check_up()?;
        let mut state = self.state.lock();
        state.calls.push(Call::Subscribe);
        match state.streams.pop_front() {
            // Like the daemon, nothing is sent until the stream is polled,
            // but items queued before then are kept.
            Some(rx) => {
                let log = Some(Arc::clone(&self.state));
                Ok(stream::unfold((rx, log), |(mut rx, log)| async move {
                    if let Some(log) = log {
                        log.lock().calls.push(Call::Poll);
                    }
                    rx.recv().await.map(|item| (item, (rx, None)))
                })
                .boxed())
            }
            None => Ok(stream::pending().boxed()),
        }
    }
}
