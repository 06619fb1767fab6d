use super::{ContainerRuntime, EventStream};
use crate::error::RuntimeError;
use crate::names::NamePolicy;
use crate::types::{ContainerEvent, ContainerRecord, ContainerState};
use async_trait::async_trait;
use bollard::container::{InspectContainerOptions, ListContainersOptions};
use bollard::models::{
    ContainerInspectResponse, ContainerStateStatusEnum, ContainerSummary, EndpointSettings,
    EventMessage, EventMessageTypeEnum,
};
use bollard::network::ListNetworksOptions;
use bollard::system::EventsOptions;
use bollard::Docker;
use futures_util::future;
use futures_util::stream::StreamExt;
use log::debug;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

const BRIDGE_DRIVER: &str = "bridge";

pub struct DockerRuntime {
    docker: Docker,
    policy: NamePolicy,
}

impl DockerRuntime {
    /// Build a client for the local daemon. No connection is made until
    /// the first request.
    pub fn connect(policy: NamePolicy) -> Result<Self, RuntimeError> {
        // Handles the unix socket on Linux and DOCKER_HOST overrides.
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker, policy })
    }

    fn record_from_summary(&self, summary: ContainerSummary) -> Option<ContainerRecord> {
        let id = summary.id?;
        let name = summary
            .names
            .as_ref()
            .and_then(|names| names.first())
            .map(String::as_str);
        let networks = summary
            .network_settings
            .as_ref()
            .and_then(|settings| settings.networks.as_ref());
        Some(build_record(
            &self.policy,
            id,
            name,
            summary.labels.as_ref(),
            networks,
            ContainerState::Running,
        ))
    }

    fn record_from_detail(&self, detail: ContainerInspectResponse) -> Option<ContainerRecord> {
        let state = detail
            .state
            .as_ref()
            .and_then(|s| s.status.clone())
            .and_then(state_from_status)?;
        let id = detail.id?;
        let labels = detail.config.as_ref().and_then(|c| c.labels.as_ref());
        let networks = detail
            .network_settings
            .as_ref()
            .and_then(|settings| settings.networks.as_ref());
        Some(build_record(
            &self.policy,
            id,
            detail.name.as_deref(),
            labels,
            networks,
            state,
        ))
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker.ping().await?;
        Ok(())
    }

    async fn bridge_networks(&self) -> Result<BTreeSet<String>, RuntimeError> {
        let networks = self
            .docker
            .list_networks(None::<ListNetworksOptions<String>>)
            .await?;
        Ok(networks
            .into_iter()
            .filter(|n| n.driver.as_deref() == Some(BRIDGE_DRIVER))
            .filter_map(|n| n.name)
            .collect())
    }

    async fn list_running(&self) -> Result<Vec<ContainerRecord>, RuntimeError> {
        let opts = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(opts)).await?;
        Ok(containers
            .into_iter()
            .filter_map(|c| self.record_from_summary(c))
            .collect())
    }

    async fn inspect(&self, container_id: &str) -> Result<Option<ContainerRecord>, RuntimeError> {
        match self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
        {
            Ok(detail) => Ok(self.record_from_detail(detail)),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!("Container {} is gone", container_id);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn events(&self) -> Result<EventStream, RuntimeError> {
        let stream = self
            .docker
            .events(Some(events_options(SystemTime::now())))
            .filter_map(|msg| {
                future::ready(match msg {
                    Ok(event) => parse_event(event).transpose(),
                    Err(e) => Some(Err(RuntimeError::from(e))),
                })
            })
            .boxed();
        Ok(stream)
    }
}

/// Event subscription options starting at `since`.
///
/// bollard only sends the request once the stream is first polled, which
/// is after the caller's reconciliation pass. The daemon replays events
/// from `since` onwards, so nothing in between is lost. The cursor is
/// floored to whole seconds and may repeat up to a second of events.
fn events_options(since: SystemTime) -> EventsOptions<String> {
    EventsOptions::<String> {
        since: since
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|d| d.as_secs().to_string()),
        filters: [
            ("type", ["container", "network"].as_slice()),
            (
                "event",
                [
                    "create",
                    "start",
                    "kill",
                    "die",
                    "destroy",
                    "connect",
                    "disconnect",
                ]
                .as_slice(),
            ),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
        .collect(),
        ..Default::default()
    }
}

/// Turn a raw daemon event into a lifecycle event.
///
/// `Ok(None)` for actions we do not track.
pub fn parse_event(event: EventMessage) -> Result<Option<ContainerEvent>, RuntimeError> {
    let action = event.action.unwrap_or_default();
    let actor = event.actor.unwrap_or_default();
    let attributes = actor.attributes.unwrap_or_default();

    match event.typ {
        Some(EventMessageTypeEnum::CONTAINER) => {
            let wanted = matches!(
                action.as_str(),
                "create" | "start" | "kill" | "die" | "destroy"
            );
            if !wanted {
                return Ok(None);
            }
            let container_id = actor
                .id
                .filter(|id| !id.is_empty())
                .ok_or_else(|| {
                    RuntimeError::MalformedEvent(format!("container {} without id", action))
                })?;
            Ok(Some(match action.as_str() {
                "create" => ContainerEvent::Create { container_id },
                "start" => ContainerEvent::Start { container_id },
                "kill" => ContainerEvent::Kill {
                    container_id,
                    signal: attributes.get("signal").cloned(),
                },
                "die" => ContainerEvent::Die { container_id },
                _ => ContainerEvent::Destroy { container_id },
            }))
        }
        Some(EventMessageTypeEnum::NETWORK) => {
            if action != "connect" && action != "disconnect" {
                return Ok(None);
            }
            let container_id = attributes
                .get("container")
                .filter(|id| !id.is_empty())
                .cloned()
                .ok_or_else(|| {
                    RuntimeError::MalformedEvent(format!("network {} without container", action))
                })?;
            let network = attributes
                .get("name")
                .filter(|name| !name.is_empty())
                .cloned()
                .or(actor.id)
                .ok_or_else(|| {
                    RuntimeError::MalformedEvent(format!("network {} without network", action))
                })?;
            Ok(Some(if action == "connect" {
                ContainerEvent::NetworkConnect {
                    container_id,
                    network,
                }
            } else {
                ContainerEvent::NetworkDisconnect {
                    container_id,
                    network,
                }
            }))
        }
        _ => Ok(None),
    }
}

fn state_from_status(status: ContainerStateStatusEnum) -> Option<ContainerState> {
    match status {
        ContainerStateStatusEnum::CREATED | ContainerStateStatusEnum::RESTARTING => {
            Some(ContainerState::Starting)
        }
        ContainerStateStatusEnum::RUNNING | ContainerStateStatusEnum::PAUSED => {
            Some(ContainerState::Running)
        }
        ContainerStateStatusEnum::REMOVING => Some(ContainerState::Stopping),
        ContainerStateStatusEnum::EXITED | ContainerStateStatusEnum::DEAD => {
            Some(ContainerState::Removed)
        }
        _ => None,
    }
}

fn build_record(
    policy: &NamePolicy,
    container_id: String,
    name: Option<&str>,
    labels: Option<&HashMap<String, String>>,
    networks: Option<&HashMap<String, EndpointSettings>>,
    state: ContainerState,
) -> ContainerRecord {
    let networks: BTreeMap<String, IpAddr> = networks
        .into_iter()
        .flatten()
        .filter_map(|(network, endpoint)| {
            endpoint_address(endpoint).map(|addr| (network.clone(), addr))
        })
        .collect();

    ContainerRecord {
        container_id,
        names: policy.derive(name, labels),
        networks,
        state,
    }
}

/// IPv4 if assigned, else the global IPv6 address. Host-mode endpoints
/// carry neither.
fn endpoint_address(endpoint: &EndpointSettings) -> Option<IpAddr> {
    [&endpoint.ip_address, &endpoint.global_ipv6_address]
        .into_iter()
        .flatten()
        .filter(|addr| !addr.is_empty())
        .find_map(|addr| addr.parse().ok())
}
