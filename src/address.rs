//! Address selection.
//!
//! Turns a container's network attachments into the single address we
//! publish for it.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

/// Name of Docker's default bridge network.
pub const DEFAULT_BRIDGE: &str = "bridge";

/// Picks one bridge-network address per container.
///
/// Prefers the configured target network. Otherwise the eligible bridge
/// network with the smallest name wins, so repeated calls on the same
/// attachments always agree.
#[derive(Debug, Clone)]
pub struct AddressResolver {
    target_network: Option<String>,
    bridges: BTreeSet<String>,
}

impl AddressResolver {
    pub fn new(target_network: Option<String>) -> Self {
        Self {
            target_network,
            bridges: BTreeSet::from([DEFAULT_BRIDGE.to_string()]),
        }
    }

    /// Replace the set of eligible bridge networks. Returns `true` when it
    /// changed.
    pub fn set_bridges(&mut self, bridges: BTreeSet<String>) -> bool {
        if self.bridges == bridges {
            return false;
        }
        self.bridges = bridges;
        true
    }

    pub fn resolve(&self, networks: &BTreeMap<String, IpAddr>) -> Option<IpAddr> {
        if let Some(target) = &self.target_network {
            if let Some(addr) = networks.get(target) {
                return Some(*addr);
            }
        }

        // BTreeMap iterates in key order, so the first hit is the smallest.
        networks
            .iter()
            .find(|(name, _)| self.bridges.contains(*name))
            .map(|(_, addr)| *addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn nets(pairs: &[(&str, &str)]) -> BTreeMap<String, IpAddr> {
        pairs.iter().map(|(n, a)| (n.to_string(), ip(a))).collect()
    }

    fn bridges(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_prefers_target_network() {
        let mut resolver = AddressResolver::new(Some("backend".into()));
        resolver.set_bridges(bridges(&["alpha", "backend"]));

        let n = nets(&[("alpha", "10.0.0.2"), ("backend", "10.1.0.2")]);
        assert_eq!(resolver.resolve(&n), Some(ip("10.1.0.2")));
    }

    #[test]
    fn test_falls_back_to_smallest_bridge_when_target_missing() {
        let mut resolver = AddressResolver::new(Some("backend".into()));
        resolver.set_bridges(bridges(&["zeta", "alpha", "bridge"]));

        let n = nets(&[("zeta", "10.9.0.2"), ("bridge", "172.17.0.2"), ("alpha", "10.0.0.2")]);
        assert_eq!(resolver.resolve(&n), Some(ip("10.0.0.2")));
        assert_eq!(resolver.resolve(&n), resolver.resolve(&n.clone()));
    }

    #[test]
    fn test_overlay_only_is_absent() {
        let mut resolver = AddressResolver::new(None);
        resolver.set_bridges(bridges(&["bridge"]));

        let n = nets(&[("swarm-overlay", "10.0.9.4")]);
        assert_eq!(resolver.resolve(&n), None);
        assert_eq!(resolver.resolve(&BTreeMap::new()), None);
    }

    #[test]
    fn test_default_bridge_eligible_before_catalog() {
        let resolver = AddressResolver::new(None);

        let n = nets(&[("bridge", "172.17.0.3"), ("custom", "10.0.0.3")]);
        assert_eq!(resolver.resolve(&n), Some(ip("172.17.0.3")));
    }

    #[test]
    fn test_target_honoured_outside_catalog() {
        let resolver = AddressResolver::new(Some("macvlan0".into()));

        let n = nets(&[("bridge", "172.17.0.3"), ("macvlan0", "192.168.1.50")]);
        assert_eq!(resolver.resolve(&n), Some(ip("192.168.1.50")));
    }

    #[test]
    fn test_set_bridges_reports_change() {
        let mut resolver = AddressResolver::new(None);
        assert!(!resolver.set_bridges(bridges(&["bridge"])));
        assert!(resolver.set_bridges(bridges(&["bridge", "app"])));
    }
}
