use std::collections::BTreeMap;

use crate::protocol::{Adjacency, Lsdb};
use crate::types::{Cost, RouterId};

/// Router-level graph derived from the LSDB.
///
/// Each edge is stored in both directions, each carrying the cost reported
/// by the router it leaves from. An edge is only present when both ends
/// list each other.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    routers: BTreeMap<RouterId, BTreeMap<RouterId, Cost>>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the graph seen from `local`. The local node is taken from
    /// `local_adjacencies` rather than from the LSDB, so it reflects the
    /// current neighbor states even before the next origination.
    pub fn build(local: &RouterId, local_adjacencies: &[Adjacency], lsdb: &Lsdb) -> Self {
        let mut topology = Self::new();
        topology.routers.entry(local.clone()).or_default();

        let lists_back = |from: &RouterId, to: &RouterId| -> bool {
            if to == local {
                local_adjacencies.iter().any(|adj| &adj.neighbor == from)
            } else {
                lsdb.get(to).is_some_and(|entry| entry.lsa().lists(from))
            }
        };

        for adj in local_adjacencies {
            if lists_back(local, &adj.neighbor) {
                topology.add_edge(local, &adj.neighbor, adj.cost);
            }
        }

        for (originator, entry) in lsdb.iter() {
            if originator == local {
                continue;
            }
            topology.routers.entry(originator.clone()).or_default();

            for adj in &entry.lsa().adjacencies {
                if lists_back(originator, &adj.neighbor) {
                    topology.add_edge(originator, &adj.neighbor, adj.cost);
                }
            }
        }

        topology
    }

    /// Adds the directed edge `from -> to`, keeping the cheapest cost when
    /// several links join the same pair.
    pub fn add_edge(&mut self, from: &RouterId, to: &RouterId, cost: Cost) {
        self.routers.entry(to.clone()).or_default();
        self.routers
            .entry(from.clone())
            .or_default()
            .entry(to.clone())
            .and_modify(|c| *c = (*c).min(cost))
            .or_insert(cost);
    }

    pub fn get_neighbors(&self, router_id: &RouterId) -> impl Iterator<Item = (&RouterId, Cost)> {
        self.routers
            .get(router_id)
            .into_iter()
            .flat_map(|edges| edges.iter().map(|(id, cost)| (id, *cost)))
    }

    pub fn node_count(&self) -> usize {
        self.routers.len()
    }

    /// Number of directed edges.
    pub fn edge_count(&self) -> usize {
        self.routers.values().map(BTreeMap::len).sum()
    }
}
