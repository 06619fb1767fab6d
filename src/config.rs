use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::names::{NamePolicy, NameSource};
use crate::sync::SyncConfig;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Network whose address is published; unset picks the smallest bridge.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_name: Option<String>,
    pub name_source: NameSource,
    pub alias_label: String,
    pub root_domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_ip: Option<String>,
    pub dns_bind: SocketAddr,
    pub ttl: u32,
    pub reconcile_interval_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_backoff_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network_name: None,
            name_source: NameSource::ContainerName,
            alias_label: "dockname.aliases".into(),
            root_domain: "docker".into(),
            bind_ip: None,
            dns_bind: SocketAddr::from(([127, 0, 0, 1], 9953)),
            ttl: 5,
            reconcile_interval_secs: 30,
            idle_timeout_secs: 60,
            max_backoff_secs: 30,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Config::default()))
                .merge(Toml::file("dockname.toml"))
                .merge(Json::file("dockname.json"))
                .merge(Env::prefixed("DOCKNAME_")),
        )
    }

    fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        let mut config: Config = figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        config.root_domain = config.root_domain.trim_matches('.').to_ascii_lowercase();

        // If bind_ip is set, override the IP part of dns_bind
        if let Some(ref ip) = config.bind_ip {
            let port = config.dns_bind.port();
            config.dns_bind = format!("{}:{}", ip, port)
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid bind_ip: {}", e))?;
        }

        if config.reconcile_interval_secs == 0
            || config.idle_timeout_secs == 0
            || config.max_backoff_secs == 0
        {
            anyhow::bail!("Intervals and timeouts must be at least one second");
        }

        Ok(config)
    }

    pub fn name_policy(&self) -> NamePolicy {
        NamePolicy::new(self.name_source, self.alias_label.clone())
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            reconcile_interval: Duration::from_secs(self.reconcile_interval_secs),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            max_backoff: self.max_backoff(),
        }
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}
