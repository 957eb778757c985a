use log::{debug, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use super::messages::HelloMessage;
use crate::types::{Cost, LinkId, RouterId};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum NeighborState {
    Down,
    /// Passed through while a first Hello is processed, never stored.
    Init,
    TwoWay,
}

/// The peer router seen on one link.
#[derive(Debug, Clone, Serialize)]
pub struct Neighbor {
    pub router_id: RouterId,
    pub address: Ipv4Addr,
    pub state: NeighborState,
    /// Link cost as configured on the neighbor's side.
    pub advertised_cost: Cost,
    #[serde(skip)]
    pub last_hello: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdjacencyChange {
    Up { link: LinkId, router_id: RouterId },
    Down { link: LinkId, router_id: RouterId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeadCheck {
    /// The dead interval elapsed without a Hello.
    Expired(AdjacencyChange),
    /// Still alive; check again at `deadline`.
    Alive { deadline: Instant },
    /// No live neighbor on the link.
    Idle,
}

/// Runs the Hello state machine, one neighbor per link.
#[derive(Debug)]
pub struct NeighborManager {
    neighbors: BTreeMap<LinkId, Neighbor>,
    dead_interval: Duration,
}

impl NeighborManager {
    pub fn new(dead_interval: Duration) -> Self {
        Self {
            neighbors: BTreeMap::new(),
            dead_interval,
        }
    }

    pub fn get(&self, link: LinkId) -> Option<&Neighbor> {
        self.neighbors.get(&link)
    }

    pub fn state(&self, link: LinkId) -> NeighborState {
        self.neighbors
            .get(&link)
            .map_or(NeighborState::Down, |neighbor| neighbor.state)
    }

    pub fn iter(&self) -> impl Iterator<Item = (LinkId, &Neighbor)> {
        self.neighbors.iter().map(|(link, neighbor)| (*link, neighbor))
    }

    /// Neighbors in `TwoWay`, in link order.
    pub fn adjacent(&self) -> impl Iterator<Item = (LinkId, &Neighbor)> {
        self.iter()
            .filter(|(_, neighbor)| neighbor.state == NeighborState::TwoWay)
    }

    pub fn is_adjacent(&self, link: LinkId) -> bool {
        self.state(link) == NeighborState::TwoWay
    }

    /// Processes a Hello received on `link` from `source`.
    ///
    /// A Hello from an unknown (or previously dead) router brings the
    /// neighbor from `Down` to `TwoWay` in one step: `Init` is never held
    /// between Hellos, so it is not stored. A different router showing up
    /// on a link replaces the previous one.
    pub fn hello_received(
        &mut self,
        link: LinkId,
        hello: &HelloMessage,
        source: Ipv4Addr,
        local_cost: Cost,
        now: Instant,
    ) -> Vec<AdjacencyChange> {
        let mut changes = Vec::new();

        if let Some(neighbor) = self.neighbors.get_mut(&link) {
            if neighbor.router_id == hello.router_id && neighbor.state == NeighborState::TwoWay {
                neighbor.last_hello = now;
                neighbor.address = source;
                neighbor.advertised_cost = hello.cost;
                debug!("Hello from {} on {} refreshed", hello.router_id, link);
                return changes;
            }

            if neighbor.state == NeighborState::TwoWay {
                warn!(
                    "Router {} replaced {} on {}",
                    hello.router_id, neighbor.router_id, link
                );
                changes.push(AdjacencyChange::Down {
                    link,
                    router_id: neighbor.router_id.clone(),
                });
            }
        }

        // A Hello over a direct link is proof enough of reachability
        let neighbor = Neighbor {
            router_id: hello.router_id.clone(),
            address: source,
            state: NeighborState::TwoWay,
            advertised_cost: hello.cost,
            last_hello: now,
        };
        info!(
            "Neighbor {} ({}) on {}: Down -> TwoWay",
            hello.router_id, source, link
        );

        if hello.cost != local_cost {
            warn!(
                "Neighbor {} on {} advertises cost {} but the local cost is {}",
                hello.router_id, link, hello.cost, local_cost
            );
        }

        self.neighbors.insert(link, neighbor);
        changes.push(AdjacencyChange::Up {
            link,
            router_id: hello.router_id.clone(),
        });
        changes
    }

    /// Dead-timer check for the neighbor on `link`.
    pub fn check_dead(&mut self, link: LinkId, now: Instant) -> DeadCheck {
        let Some(neighbor) = self.neighbors.get_mut(&link) else {
            return DeadCheck::Idle;
        };
        if neighbor.state == NeighborState::Down {
            return DeadCheck::Idle;
        }

        let deadline = neighbor.last_hello + self.dead_interval;
        if now < deadline {
            return DeadCheck::Alive { deadline };
        }

        warn!(
            "Neighbor {} on {} is dead (no hello for {:?})",
            neighbor.router_id,
            link,
            now.saturating_duration_since(neighbor.last_hello)
        );
        neighbor.state = NeighborState::Down;
        DeadCheck::Expired(AdjacencyChange::Down {
            link,
            router_id: neighbor.router_id.clone(),
        })
    }
}
