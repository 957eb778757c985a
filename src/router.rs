use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use crate::algorithms::dijkstra::calculate_shortest_paths;
use crate::config::ProtocolTimers;
use crate::network::{LinkTable, Topology};
use crate::protocol::{
    Adjacency, AdjacencyChange, DeadCheck, HelloMessage, InstallOutcome, Lsa, Lsdb, LsdbSummary,
    NeighborManager, NeighborState, NextHop, NextHopTable, ProtocolMessage, Route, RouteTable,
    Timer, TimerQueue,
};
use crate::types::{LinkId, RouterId};

/// How often LSDB ages are checked against MaxAge.
pub const AGE_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Input to the router state machine.
#[derive(Debug, Clone)]
pub enum Event {
    HelloReceived {
        link: LinkId,
        source: Ipv4Addr,
        hello: HelloMessage,
    },
    LsaReceived {
        link: LinkId,
        source: Ipv4Addr,
        lsa: Lsa,
    },
    Timer(Timer),
}

/// A message to broadcast on one link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmit {
    pub link: LinkId,
    pub message: ProtocolMessage,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub malformed: u64,
    pub unknown_source: u64,
    pub stale_lsas: u64,
    pub duplicate_lsas: u64,
    pub installed_lsas: u64,
    pub expired_lsas: u64,
    pub originations: u64,
    pub spf_runs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NeighborSummary {
    pub link: String,
    pub router_id: RouterId,
    pub address: Ipv4Addr,
    pub state: NeighborState,
}

/// Point-in-time view of a router, for status dumps.
#[derive(Debug, Clone, Serialize)]
pub struct RouterSnapshot {
    pub router_id: RouterId,
    pub generated_at: DateTime<Utc>,
    pub sequence: u64,
    pub neighbors: Vec<NeighborSummary>,
    pub lsdb: Vec<LsdbSummary>,
    pub next_hops: NextHopTable,
    pub routes: Vec<Route>,
    pub stats: Stats,
}

/// All protocol state of one router.
///
/// The router never performs I/O: callers feed it datagrams and expired
/// timers and send the returned [`Transmit`]s. Events are processed one at
/// a time and SPF runs to completion before the next event is accepted.
#[derive(Debug)]
pub struct Router {
    id: RouterId,
    links: LinkTable,
    config: ProtocolTimers,
    neighbors: NeighborManager,
    lsdb: Lsdb,
    timers: TimerQueue,
    dead_timers: BTreeSet<LinkId>,
    sequence: u64,
    last_origination: Option<Instant>,
    origination_pending: bool,
    spf_pending: bool,
    next_hops: NextHopTable,
    routes: RouteTable,
    routes_version: u64,
    stats: Stats,
}

impl Router {
    pub fn new(id: RouterId, links: LinkTable, config: ProtocolTimers) -> Self {
        Self {
            id,
            links,
            neighbors: NeighborManager::new(config.dead_interval),
            lsdb: Lsdb::new(config.max_age, config.max_age_diff()),
            config,
            timers: TimerQueue::new(),
            dead_timers: BTreeSet::new(),
            sequence: 0,
            last_origination: None,
            origination_pending: false,
            spf_pending: false,
            next_hops: NextHopTable::new(),
            routes: RouteTable::new(),
            routes_version: 0,
            stats: Stats::default(),
        }
    }

    /// Starts numbering LSAs after `sequence`, so a restarted router does
    /// not reuse numbers its neighbors still remember.
    pub fn with_initial_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn id(&self) -> &RouterId {
        &self.id
    }

    pub fn links(&self) -> &LinkTable {
        &self.links
    }

    pub fn neighbors(&self) -> &NeighborManager {
        &self.neighbors
    }

    pub fn lsdb(&self) -> &Lsdb {
        &self.lsdb
    }

    pub fn next_hops(&self) -> &NextHopTable {
        &self.next_hops
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Bumped every time the route table changes.
    pub fn routes_version(&self) -> u64 {
        self.routes_version
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Arms the periodic timers and originates the first LSA.
    pub fn start(&mut self, now: Instant) -> Vec<Transmit> {
        info!(
            "Starting router {} on {} links (sequence {})",
            self.id,
            self.links.len(),
            self.sequence
        );

        for link in self.links.iter() {
            self.timers.schedule(now, Timer::Hello(link.id));
        }
        self.timers.schedule(now + AGE_SWEEP_INTERVAL, Timer::AgeSweep);
        self.timers
            .schedule(now + self.config.refresh_interval, Timer::Refresh);

        let out = self.originate(now);
        self.spf_pending = true;
        self.finish();
        out
    }

    /// Decodes a datagram received from `source` and processes it.
    /// Datagrams that cannot be attributed to a link or decoded are
    /// counted and dropped.
    pub fn handle_datagram(&mut self, source: Ipv4Addr, payload: &[u8], now: Instant) -> Vec<Transmit> {
        if self.links.is_local_address(source) {
            return Vec::new();
        }

        let Some(link) = self.links.find_by_source(source).map(|link| link.id) else {
            self.stats.unknown_source += 1;
            debug!("Dropping datagram from {}: not on any attached subnet", source);
            return Vec::new();
        };

        let message = match ProtocolMessage::decode(payload) {
            Ok(message) => message,
            Err(e) => {
                self.stats.malformed += 1;
                debug!("Dropping datagram from {} on {}: {}", source, link, e);
                return Vec::new();
            }
        };

        let event = match message {
            ProtocolMessage::Hello(hello) => Event::HelloReceived { link, source, hello },
            ProtocolMessage::Lsa(lsa) => Event::LsaReceived { link, source, lsa },
        };
        self.handle_event(event, now)
    }

    pub fn handle_event(&mut self, event: Event, now: Instant) -> Vec<Transmit> {
        let out = match event {
            Event::HelloReceived { link, source, hello } => {
                self.on_hello(link, source, hello, now)
            }
            Event::LsaReceived { link, source, lsa } => self.on_lsa(link, source, lsa, now),
            Event::Timer(timer) => self.on_timer(timer, now),
        };
        self.finish();
        out
    }

    /// Fires every timer due at `now`.
    pub fn poll_timers(&mut self, now: Instant) -> Vec<Transmit> {
        let mut out = Vec::new();
        while let Some(timer) = self.timers.pop_due(now) {
            out.extend(self.handle_event(Event::Timer(timer), now));
        }
        out
    }

    fn on_hello(&mut self, link: LinkId, source: Ipv4Addr, hello: HelloMessage, now: Instant) -> Vec<Transmit> {
        if hello.router_id == self.id {
            return Vec::new();
        }
        let Some(local_cost) = self.links.get(link).map(|l| l.cost) else {
            return Vec::new();
        };

        debug!("Hello from {} ({}) on {}", hello.router_id, source, link);
        let changes = self
            .neighbors
            .hello_received(link, &hello, source, local_cost, now);

        let mut out = Vec::new();
        for change in changes {
            out.extend(self.on_adjacency_change(change, now));
        }
        out
    }

    fn on_adjacency_change(&mut self, change: AdjacencyChange, now: Instant) -> Vec<Transmit> {
        let mut out = Vec::new();

        match change {
            AdjacencyChange::Up { link, router_id } => {
                if self.dead_timers.insert(link) {
                    self.timers
                        .schedule(now + self.config.dead_interval, Timer::Dead(link));
                }

                // Bring the new neighbor up to date with everything we know
                let lsas = self.lsdb.aged_copies(now);
                debug!("Sending {} LSAs to new neighbor {} on {}", lsas.len(), router_id, link);
                out.extend(lsas.into_iter().map(|lsa| Transmit {
                    link,
                    message: ProtocolMessage::Lsa(lsa),
                }));
            }
            AdjacencyChange::Down { link, router_id } => {
                info!("Adjacency with {} on {} lost", router_id, link);
            }
        }

        self.spf_pending = true;
        out.extend(self.request_origination(now));
        out
    }

    fn on_lsa(&mut self, link: LinkId, source: Ipv4Addr, lsa: Lsa, now: Instant) -> Vec<Transmit> {
        if lsa.originator == self.id {
            if lsa.sequence > self.sequence {
                warn!(
                    "Received own LSA with sequence {} (local {}), re-originating past it",
                    lsa.sequence, self.sequence
                );
                self.sequence = lsa.sequence;
                return self.request_origination(now);
            }
            return Vec::new();
        }

        match self.lsdb.install(lsa.clone(), now) {
            InstallOutcome::Installed => {
                self.stats.installed_lsas += 1;
                self.spf_pending = true;
                debug!(
                    "Installed LSA {} seq {} from {} on {}",
                    lsa.originator, lsa.sequence, source, link
                );
                self.flood(&lsa, Some(link))
            }
            InstallOutcome::Duplicate => {
                self.stats.duplicate_lsas += 1;
                Vec::new()
            }
            InstallOutcome::Stale => {
                self.stats.stale_lsas += 1;
                debug!(
                    "Stale LSA {} seq {} from {}, answering with our copy",
                    lsa.originator, lsa.sequence, source
                );
                self.lsdb
                    .aged_copy(&lsa.originator, now)
                    .map(|newer| Transmit {
                        link,
                        message: ProtocolMessage::Lsa(newer),
                    })
                    .into_iter()
                    .collect()
            }
            InstallOutcome::Expired => {
                self.stats.stale_lsas += 1;
                Vec::new()
            }
        }
    }

    fn on_timer(&mut self, timer: Timer, now: Instant) -> Vec<Transmit> {
        match timer {
            Timer::Hello(link) => {
                self.timers
                    .schedule(now + self.config.hello_interval, Timer::Hello(link));
                let Some(cost) = self.links.get(link).map(|l| l.cost) else {
                    return Vec::new();
                };
                vec![Transmit {
                    link,
                    message: ProtocolMessage::Hello(HelloMessage {
                        router_id: self.id.clone(),
                        cost,
                    }),
                }]
            }
            Timer::Dead(link) => match self.neighbors.check_dead(link, now) {
                DeadCheck::Alive { deadline } => {
                    self.timers.schedule(deadline, Timer::Dead(link));
                    Vec::new()
                }
                DeadCheck::Expired(change) => {
                    self.dead_timers.remove(&link);
                    self.on_adjacency_change(change, now)
                }
                DeadCheck::Idle => {
                    self.dead_timers.remove(&link);
                    Vec::new()
                }
            },
            Timer::AgeSweep => {
                self.timers.schedule(now + AGE_SWEEP_INTERVAL, Timer::AgeSweep);
                let expired = self.lsdb.remove_expired(now);
                if expired.is_empty() {
                    return Vec::new();
                }

                info!("Purged expired LSAs: {:?}", expired);
                self.stats.expired_lsas += expired.len() as u64;
                self.spf_pending = true;
                if expired.contains(&self.id) {
                    return self.request_origination(now);
                }
                Vec::new()
            }
            Timer::Originate => {
                self.origination_pending = false;
                self.originate(now)
            }
            Timer::Refresh => {
                self.timers
                    .schedule(now + self.config.refresh_interval, Timer::Refresh);
                self.request_origination(now)
            }
        }
    }

    /// Originates now, or once the hold-down since the last origination
    /// has elapsed. Requests inside the hold-down collapse into one.
    fn request_origination(&mut self, now: Instant) -> Vec<Transmit> {
        if self.origination_pending {
            return Vec::new();
        }

        match self.last_origination {
            Some(last) if now < last + self.config.min_lsa_interval => {
                self.origination_pending = true;
                self.timers
                    .schedule(last + self.config.min_lsa_interval, Timer::Originate);
                debug!("Origination deferred by rate limit");
                Vec::new()
            }
            _ => self.originate(now),
        }
    }

    fn originate(&mut self, now: Instant) -> Vec<Transmit> {
        self.sequence += 1;
        let lsa = Lsa {
            originator: self.id.clone(),
            sequence: self.sequence,
            age: 0,
            adjacencies: self.local_adjacencies(),
            networks: self.links.subnets(),
        };

        info!(
            "Originating LSA seq {} with {} adjacencies",
            lsa.sequence,
            lsa.adjacencies.len()
        );

        if self.lsdb.install(lsa.clone(), now) != InstallOutcome::Installed {
            warn!("Own LSA seq {} was not accepted by the LSDB", lsa.sequence);
        }
        self.last_origination = Some(now);
        self.stats.originations += 1;

        self.flood(&lsa, None)
    }

    /// Sends `lsa` on every adjacent link except the one it came from.
    fn flood(&self, lsa: &Lsa, except: Option<LinkId>) -> Vec<Transmit> {
        self.neighbors
            .adjacent()
            .filter(|(link, _)| Some(*link) != except)
            .map(|(link, _)| Transmit {
                link,
                message: ProtocolMessage::Lsa(lsa.clone()),
            })
            .collect()
    }

    fn local_adjacencies(&self) -> Vec<Adjacency> {
        let mut adjacencies: Vec<Adjacency> = self
            .neighbors
            .adjacent()
            .filter_map(|(link, neighbor)| {
                let cost = self.links.get(link)?.cost;
                Some(Adjacency {
                    neighbor: neighbor.router_id.clone(),
                    cost,
                })
            })
            .collect();
        adjacencies.sort();
        adjacencies.dedup();
        adjacencies
    }

    /// Runs SPF if anything changed since the last run.
    fn finish(&mut self) {
        if self.spf_pending {
            self.spf_pending = false;
            self.recompute();
        }
    }

    fn recompute(&mut self) {
        let topology = Topology::build(&self.id, &self.local_adjacencies(), &self.lsdb);
        let paths = calculate_shortest_paths(&topology, &self.id);
        self.stats.spf_runs += 1;

        let mut next_hops = NextHopTable::new();
        for (destination, path) in paths {
            let via = self
                .neighbors
                .adjacent()
                .filter(|(_, neighbor)| neighbor.router_id == path.next_hop)
                .filter_map(|(link, neighbor)| {
                    let cost = self.links.get(link)?.cost;
                    Some((cost, link, neighbor.address))
                })
                .min();

            let Some((_, link, gateway)) = via else {
                warn!("No adjacent link towards next hop {}", path.next_hop);
                continue;
            };

            next_hops.insert(
                destination,
                NextHop {
                    next_hop: path.next_hop,
                    link,
                    gateway,
                    cost: path.cost,
                },
            );
        }

        debug!(
            "SPF over {} routers / {} edges: {} reachable",
            topology.node_count(),
            topology.edge_count(),
            next_hops.len()
        );

        if next_hops != self.next_hops {
            let changed = self.next_hops.changed_destinations(&next_hops);
            info!("Next-hop table updated ({} destinations changed: {:?})", changed.len(), changed);
            self.next_hops = next_hops;
        }

        let routes = RouteTable::from_next_hops(&self.next_hops, &self.lsdb, &self.links);
        if routes != self.routes {
            self.routes = routes;
            self.routes_version += 1;
        }
    }

    pub fn snapshot(&self, now: Instant) -> RouterSnapshot {
        RouterSnapshot {
            router_id: self.id.clone(),
            generated_at: Utc::now(),
            sequence: self.sequence,
            neighbors: self
                .neighbors
                .iter()
                .map(|(link, neighbor)| NeighborSummary {
                    link: self
                        .links
                        .get(link)
                        .map_or_else(|| link.to_string(), |l| l.name.clone()),
                    router_id: neighbor.router_id.clone(),
                    address: neighbor.address,
                    state: neighbor.state,
                })
                .collect(),
            lsdb: self.lsdb.summary(now),
            next_hops: self.next_hops.clone(),
            routes: self.routes.iter().cloned().collect(),
            stats: self.stats,
        }
    }
}
