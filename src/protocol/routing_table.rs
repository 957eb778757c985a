use ipnet::Ipv4Net;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use super::lsdb::Lsdb;
use crate::network::LinkTable;
use crate::types::{Cost, LinkId, RouterId};

/// Where to forward traffic for one destination router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NextHop {
    pub next_hop: RouterId,
    pub link: LinkId,
    /// Address of `next_hop` on `link`.
    pub gateway: Ipv4Addr,
    pub cost: Cost,
}

/// Output of one SPF run, keyed by destination router.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NextHopTable {
    entries: BTreeMap<RouterId, NextHop>,
}

impl NextHopTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, destination: RouterId, next_hop: NextHop) {
        self.entries.insert(destination, next_hop);
    }

    pub fn get(&self, destination: &RouterId) -> Option<&NextHop> {
        self.entries.get(destination)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RouterId, &NextHop)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Destinations that were added, removed or changed between `self`
    /// and `other`.
    pub fn changed_destinations<'a>(&'a self, other: &'a NextHopTable) -> Vec<&'a RouterId> {
        let mut changed: Vec<&RouterId> = other
            .entries
            .iter()
            .filter(|(dst, hop)| self.entries.get(*dst) != Some(*hop))
            .map(|(dst, _)| dst)
            .collect();
        changed.extend(
            self.entries
                .keys()
                .filter(|dst| !other.entries.contains_key(*dst)),
        );
        changed.sort();
        changed
    }
}

/// One kernel route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    pub destination: Ipv4Net,
    pub gateway: Ipv4Addr,
    pub interface: String,
    pub metric: Cost,
    /// Router advertising the destination network.
    pub via: RouterId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteChange {
    Replace(Route),
    Remove(Route),
}

/// Per-prefix routes derived from a next-hop table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RouteTable {
    routes: BTreeMap<Ipv4Net, Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expands every reachable router into the networks it advertises.
    /// Networks attached to this router are left to the kernel; a network
    /// advertised by several routers goes to the cheapest one, the lower
    /// router id on a tie.
    pub fn from_next_hops(next_hops: &NextHopTable, lsdb: &Lsdb, links: &LinkTable) -> Self {
        let connected = links.subnets();
        let mut table = Self::new();

        for (destination, hop) in next_hops.iter() {
            let Some(entry) = lsdb.get(destination) else {
                continue;
            };
            let Some(link) = links.get(hop.link) else {
                continue;
            };

            for network in &entry.lsa().networks {
                let network = network.trunc();
                if connected.contains(&network) {
                    continue;
                }

                let candidate = Route {
                    destination: network,
                    gateway: hop.gateway,
                    interface: link.name.clone(),
                    metric: hop.cost,
                    via: destination.clone(),
                };

                let better = table.routes.get(&network).is_none_or(|current| {
                    (candidate.metric, &candidate.via) < (current.metric, &current.via)
                });
                if better {
                    table.routes.insert(network, candidate);
                }
            }
        }

        table
    }

    pub fn insert(&mut self, route: Route) {
        self.routes.insert(route.destination, route);
    }

    pub fn remove(&mut self, destination: &Ipv4Net) -> Option<Route> {
        self.routes.remove(destination)
    }

    pub fn get(&self, destination: &Ipv4Net) -> Option<&Route> {
        self.routes.get(destination)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.values()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Minimal set of operations turning `self` into `desired`. A route
    /// whose advertising router changed is replaced too, so the installed
    /// view never reports a stale `via`.
    pub fn diff(&self, desired: &RouteTable) -> Vec<RouteChange> {
        let mut changes: Vec<RouteChange> = desired
            .routes
            .values()
            .filter(|route| {
                self.routes
                    .get(&route.destination)
                    .is_none_or(|current| current != *route)
            })
            .cloned()
            .map(RouteChange::Replace)
            .collect();

        changes.extend(
            self.routes
                .values()
                .filter(|route| !desired.routes.contains_key(&route.destination))
                .cloned()
                .map(RouteChange::Remove),
        );
        changes
    }
}
