//! Hostname derivation.
//!
//! Decides which hostnames a container claims, from its name and labels.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

const COMPOSE_SERVICE_LABEL: &str = "com.docker.compose.service";
const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";

/// Where a container's hostnames come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NameSource {
    /// The container's own name.
    #[default]
    ContainerName,
    /// Explicit aliases from the alias label, plus `<service>.<project>`
    /// for compose containers.
    AliasLabel,
    /// Union of both.
    Both,
}

#[derive(Debug, Clone)]
pub struct NamePolicy {
    source: NameSource,
    alias_label: String,
}

impl NamePolicy {
    pub fn new(source: NameSource, alias_label: impl Into<String>) -> Self {
        Self {
            source,
            alias_label: alias_label.into(),
        }
    }

    /// Derive the hostname set for a container.
    ///
    /// `container_name` may carry Docker's leading `/`. The result is
    /// empty when the policy finds nothing to claim.
    pub fn derive(
        &self,
        container_name: Option<&str>,
        labels: Option<&HashMap<String, String>>,
    ) -> BTreeSet<String> {
        let mut names = BTreeSet::new();

        if matches!(self.source, NameSource::ContainerName | NameSource::Both) {
            if let Some(name) = container_name.and_then(normalize) {
                names.insert(name);
            }
        }

        if matches!(self.source, NameSource::AliasLabel | NameSource::Both) {
            if let Some(labels) = labels {
                if let Some(aliases) = labels.get(&self.alias_label) {
                    names.extend(aliases.split(',').filter_map(normalize));
                }
                let service = labels.get(COMPOSE_SERVICE_LABEL);
                let project = labels.get(COMPOSE_PROJECT_LABEL);
                if let (Some(service), Some(project)) = (service, project) {
                    if let Some(name) = normalize(&format!("{}.{}", service, project)) {
                        names.insert(name);
                    }
                }
            }
        }

        names
    }
}

/// Lower-case a hostname and strip Docker's `/` prefix and stray dots.
pub fn normalize(name: &str) -> Option<String> {
    let name = name
        .trim()
        .trim_start_matches('/')
        .trim_matches('.')
        .to_ascii_lowercase();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}
