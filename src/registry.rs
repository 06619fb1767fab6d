//! The name registry: container records and the bindings derived from them.
//!
//! All mutations take the write lock once and apply the record change and
//! every dependent binding recomputation before releasing it, so readers
//! only ever see fully applied updates. No I/O happens under the lock.

use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::Arc;

use log::{debug, info};
use parking_lot::RwLock;

use crate::address::AddressResolver;
use crate::types::{ContainerRecord, ContainerState, ResolvedBinding};

/// Thread-safe hostname → address registry.
#[derive(Debug, Clone)]
pub struct NameRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

#[derive(Debug)]
struct RegistryInner {
    resolver: AddressResolver,

    /// container_id -> record
    records: HashMap<String, ContainerRecord>,

    /// hostname -> ids of every record claiming it (ordered, so the first
    /// eligible id is the tie-break winner)
    claims: HashMap<String, BTreeSet<String>>,

    /// hostname -> published binding (derived)
    bindings: HashMap<String, ResolvedBinding>,
}

/// What a reconciliation pass changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub removed: Vec<String>,
    pub upserted: Vec<String>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.upserted.is_empty()
    }
}

impl NameRegistry {
    pub fn new(resolver: AddressResolver) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner {
                resolver,
                records: HashMap::new(),
                claims: HashMap::new(),
                bindings: HashMap::new(),
            })),
        }
    }

    /// Insert or replace a record and recompute the bindings it touches.
    ///
    /// A record with no names, or in the terminal `Removed` state, is
    /// removed instead.
    pub fn upsert(&self, record: ContainerRecord) {
        let mut inner = self.inner.write();
        inner.upsert(record);
    }

    /// Apply many upserts as one atomic update. Returns how many records
    /// were stored.
    pub fn upsert_all(&self, records: impl IntoIterator<Item = ContainerRecord>) -> usize {
        let mut inner = self.inner.write();
        let mut stored = 0;
        for record in records {
            if inner.upsert(record) {
                stored += 1;
            }
        }
        stored
    }

    /// Delete a record and re-elect owners for its former hostnames.
    pub fn remove(&self, container_id: &str) -> Option<ContainerRecord> {
        let mut inner = self.inner.write();
        inner.remove(container_id)
    }

    /// Replace the eligible bridge networks. Every binding is recomputed if
    /// the set changed.
    pub fn set_bridge_networks(&self, bridges: BTreeSet<String>) {
        let mut inner = self.inner.write();
        if inner.resolver.set_bridges(bridges) {
            debug!("bridge networks changed, rebuilding all bindings");
            inner.rebind_all();
        }
    }

    /// Make the registry match a full listing of running containers.
    ///
    /// Records missing from `running` are removed; listed records that are
    /// new or differ from what we hold are upserted. The bridge set and all
    /// record changes are applied under one write lock.
    pub fn reconcile(
        &self,
        bridges: BTreeSet<String>,
        running: Vec<ContainerRecord>,
    ) -> ReconcileReport {
        let mut inner = self.inner.write();
        let mut report = ReconcileReport::default();

        if inner.resolver.set_bridges(bridges) {
            inner.rebind_all();
        }

        let listed: BTreeSet<&str> = running.iter().map(|r| r.container_id.as_str()).collect();
        let stale: Vec<String> = inner
            .records
            .keys()
            .filter(|id| !listed.contains(id.as_str()))
            .cloned()
            .collect();
        for id in stale {
            inner.remove(&id);
            report.removed.push(id);
        }

        for record in running {
            if inner.records.get(&record.container_id) == Some(&record) {
                continue;
            }
            let id = record.container_id.clone();
            if inner.upsert(record) {
                report.upserted.push(id);
            }
        }

        report.removed.sort();
        report.upserted.sort();
        report
    }

    /// Address currently published for `hostname`.
    pub fn lookup(&self, hostname: &str) -> Option<IpAddr> {
        self.inner.read().bindings.get(hostname).map(|b| b.address)
    }

    #[cfg(test)]
    pub fn binding(&self, hostname: &str) -> Option<ResolvedBinding> {
        self.inner.read().bindings.get(hostname).cloned()
    }

    /// All bindings, sorted by hostname, from one point in time.
    pub fn snapshot(&self) -> Vec<(String, IpAddr)> {
        let inner = self.inner.read();
        let mut entries: Vec<(String, IpAddr)> = inner
            .bindings
            .values()
            .map(|b| (b.hostname.clone(), b.address))
            .collect();
        entries.sort();
        entries
    }

    pub fn get(&self, container_id: &str) -> Option<ContainerRecord> {
        self.inner.read().records.get(container_id).cloned()
    }

    /// Ids of every record we currently track.
    #[cfg(test)]
    pub fn live_ids(&self) -> BTreeSet<String> {
        self.inner.read().records.keys().cloned().collect()
    }

    pub fn containers_count(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn bindings_count(&self) -> usize {
        self.inner.read().bindings.len()
    }
}

impl RegistryInner {
    /// Returns `true` if the record was stored.
    fn upsert(&mut self, record: ContainerRecord) -> bool {
        if record.names.is_empty() || record.state == ContainerState::Removed {
            debug!(
                "record {} has nothing to publish ({:?}), dropping",
                record.container_id, record.state
            );
            self.remove(&record.container_id);
            return false;
        }

        let mut affected = record.names.clone();
        if let Some(previous) = self.records.remove(&record.container_id) {
            for name in previous.names {
                self.release(&name, &record.container_id);
                affected.insert(name);
            }
        }

        for name in &record.names {
            self.claims
                .entry(name.clone())
                .or_default()
                .insert(record.container_id.clone());
        }
        debug!(
            "upserting {} names={:?} networks={:?} state={:?}",
            record.container_id, record.names, record.networks, record.state
        );
        self.records.insert(record.container_id.clone(), record);

        for hostname in &affected {
            self.rebind(hostname);
        }
        true
    }

    fn remove(&mut self, container_id: &str) -> Option<ContainerRecord> {
        let record = self.records.remove(container_id)?;
        debug!("removed {}", container_id);
        for name in &record.names {
            self.release(name, container_id);
            self.rebind(name);
        }
        Some(record)
    }

    fn release(&mut self, hostname: &str, container_id: &str) {
        if let Some(ids) = self.claims.get_mut(hostname) {
            ids.remove(container_id);
            if ids.is_empty() {
                self.claims.remove(hostname);
            }
        }
    }

    /// Re-run the tie-break for one hostname against current records.
    fn rebind(&mut self, hostname: &str) {
        match self.elect(hostname) {
            Some(binding) => {
                if self.bindings.get(hostname) != Some(&binding) {
                    info!(
                        "{} -> {} ({})",
                        hostname, binding.address, binding.source_container_id
                    );
                    self.bindings.insert(hostname.to_string(), binding);
                }
            }
            None => {
                if self.bindings.remove(hostname).is_some() {
                    info!("{} no longer resolves", hostname);
                }
            }
        }
    }

    fn elect(&self, hostname: &str) -> Option<ResolvedBinding> {
        self.claims.get(hostname)?.iter().find_map(|id| {
            let record = self.records.get(id)?;
            if !record.state.is_publishable() {
                return None;
            }
            let address = self.resolver.resolve(&record.networks)?;
            Some(ResolvedBinding {
                hostname: hostname.to_string(),
                address,
                source_container_id: id.clone(),
            })
        })
    }

    fn rebind_all(&mut self) {
        let hostnames: Vec<String> = self.claims.keys().cloned().collect();
        for hostname in &hostnames {
            self.rebind(hostname);
        }
    }
}
