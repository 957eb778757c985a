//! Several routers over a simulated broadcast network with a virtual clock.

use maplit::btreemap;
use pretty_assertions::assert_eq;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use linkstate_router::network::{Link, LinkTable};
use linkstate_router::protocol::ProtocolMessage;
use linkstate_router::{Cost, LinkId, ProtocolTimers, Router, RouterId, Transmit};

const STEP: Duration = Duration::from_millis(100);
const MAX_DELIVERIES: usize = 100_000;

fn timers() -> ProtocolTimers {
    ProtocolTimers {
        hello_interval: Duration::from_secs(1),
        dead_interval: Duration::from_secs(4),
        refresh_interval: Duration::from_secs(30),
        max_age: Duration::from_secs(60),
        min_lsa_interval: Duration::from_secs(1),
    }
}

fn id(name: &str) -> RouterId {
    RouterId::new(name).unwrap()
}

/// One end of a point-to-point subnet.
#[derive(Debug, Clone)]
struct Port {
    router: RouterId,
    link: LinkId,
    address: Ipv4Addr,
}

#[derive(Debug)]
struct Wire {
    ends: [Port; 2],
    up: bool,
}

/// A message seen on a wire, kept for flood accounting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Delivery {
    sender: RouterId,
    link: LinkId,
    originator: RouterId,
    sequence: u64,
}

struct Network {
    routers: BTreeMap<RouterId, Router>,
    wires: Vec<Wire>,
    ports: HashMap<(RouterId, LinkId), usize>,
    now: Instant,
    lsa_log: Vec<Delivery>,
}

impl Network {
    /// Wire `k` is the subnet 10.0.k.0/24: the first router gets .2 and
    /// the second .3.
    fn new(edges: &[(&str, &str, Cost)]) -> Self {
        let mut links: BTreeMap<RouterId, Vec<Link>> = BTreeMap::new();
        let mut wires = Vec::new();
        let mut ports = HashMap::new();

        for (k, (a, b, cost)) in edges.iter().enumerate() {
            let mut ends = Vec::new();
            for (name, host) in [(a, 2u8), (b, 3u8)] {
                let router = id(name);
                let router_links = links.entry(router.clone()).or_default();
                let link = LinkId(router_links.len());
                let address = Ipv4Addr::new(10, 0, k as u8, host);
                router_links.push(Link::new(
                    link,
                    format!("eth{}", link.0),
                    format!("{}/24", address).parse().unwrap(),
                    *cost,
                ));
                ports.insert((router.clone(), link), k);
                ends.push(Port {
                    router,
                    link,
                    address,
                });
            }
            let [first, second]: [Port; 2] = ends.try_into().unwrap();
            wires.push(Wire {
                ends: [first, second],
                up: true,
            });
        }

        let routers = links
            .into_iter()
            .map(|(router, links)| {
                let router_id = router.clone();
                (router, Router::new(router_id, LinkTable::new(links), timers()))
            })
            .collect();

        Self {
            routers,
            wires,
            ports,
            now: Instant::now(),
            lsa_log: Vec::new(),
        }
    }

    fn start(&mut self) {
        let now = self.now;
        let mut queue = VecDeque::new();
        for (id, router) in self.routers.iter_mut() {
            queue.extend(router.start(now).into_iter().map(|t| (id.clone(), t)));
        }
        self.deliver(queue);
    }

    fn run_for(&mut self, duration: Duration) {
        let end = self.now + duration;
        while self.now < end {
            self.now += STEP;
            let now = self.now;
            let mut queue = VecDeque::new();
            for (id, router) in self.routers.iter_mut() {
                queue.extend(router.poll_timers(now).into_iter().map(|t| (id.clone(), t)));
            }
            self.deliver(queue);
        }
    }

    /// Delivers every queued message and whatever it triggers, in order.
    fn deliver(&mut self, mut queue: VecDeque<(RouterId, Transmit)>) {
        let mut deliveries = 0;

        while let Some((sender, transmit)) = queue.pop_front() {
            deliveries += 1;
            assert!(deliveries < MAX_DELIVERIES, "flooding did not terminate");

            let Some(&wire) = self.ports.get(&(sender.clone(), transmit.link)) else {
                panic!("{} sent on unknown {}", sender, transmit.link);
            };
            let wire = &self.wires[wire];
            if !wire.up {
                continue;
            }
            let (from, to) = if wire.ends[0].router == sender {
                (&wire.ends[0], &wire.ends[1])
            } else {
                (&wire.ends[1], &wire.ends[0])
            };

            if let ProtocolMessage::Lsa(lsa) = &transmit.message {
                self.lsa_log.push(Delivery {
                    sender: sender.clone(),
                    link: transmit.link,
                    originator: lsa.originator.clone(),
                    sequence: lsa.sequence,
                });
            }

            let data = transmit.message.encode().unwrap();
            let receiver = to.router.clone();
            let router = self.routers.get_mut(&receiver).unwrap();
            let out = router.handle_datagram(from.address, &data, self.now);
            queue.extend(out.into_iter().map(|t| (receiver.clone(), t)));
        }
    }

    fn cut(&mut self, a: &str, b: &str) {
        let (a, b) = (id(a), id(b));
        for wire in &mut self.wires {
            let routers = [&wire.ends[0].router, &wire.ends[1].router];
            if routers == [&a, &b] || routers == [&b, &a] {
                wire.up = false;
            }
        }
    }

    fn router(&self, name: &str) -> &Router {
        &self.routers[&id(name)]
    }

    /// Destination -> (next hop, cost) as resolved by `name`.
    fn table(&self, name: &str) -> BTreeMap<RouterId, (RouterId, Cost)> {
        self.router(name)
            .next_hops()
            .iter()
            .map(|(dst, hop)| (dst.clone(), (hop.next_hop.clone(), hop.cost)))
            .collect()
    }

    /// All-pairs distances over the wires that are up.
    fn reference_distances(&self) -> BTreeMap<(RouterId, RouterId), Cost> {
        let nodes: Vec<&RouterId> = self.routers.keys().collect();
        let mut dist: BTreeMap<(RouterId, RouterId), Cost> = BTreeMap::new();

        for node in &nodes {
            dist.insert(((*node).clone(), (*node).clone()), 0);
        }
        for wire in self.wires.iter().filter(|w| w.up) {
            let (a, b) = (&wire.ends[0], &wire.ends[1]);
            let cost = self.routers[&a.router].links().get(a.link).unwrap().cost;
            for (x, y) in [(&a.router, &b.router), (&b.router, &a.router)] {
                let entry = dist.entry((x.clone(), y.clone())).or_insert(cost);
                *entry = (*entry).min(cost);
            }
        }

        for k in &nodes {
            for i in &nodes {
                for j in &nodes {
                    let via = dist
                        .get(&((*i).clone(), (*k).clone()))
                        .zip(dist.get(&((*k).clone(), (*j).clone())))
                        .map(|(a, b)| a + b);
                    if let Some(via) = via {
                        let key = ((*i).clone(), (*j).clone());
                        if dist.get(&key).is_none_or(|d| via < *d) {
                            dist.insert(key, via);
                        }
                    }
                }
            }
        }
        dist
    }

    /// Every router reaches every other router at the shortest cost,
    /// through a neighbor that lies on a shortest path.
    fn assert_converged(&self) {
        let dist = self.reference_distances();

        for (source, router) in &self.routers {
            let reachable: Vec<&RouterId> = self
                .routers
                .keys()
                .filter(|dst| *dst != source && dist.contains_key(&(source.clone(), (*dst).clone())))
                .collect();
            assert_eq!(
                router.next_hops().len(),
                reachable.len(),
                "{} has the wrong number of destinations",
                source
            );

            for dst in reachable {
                let best = dist[&(source.clone(), dst.clone())];
                let hop = router
                    .next_hops()
                    .get(dst)
                    .unwrap_or_else(|| panic!("{} has no route to {}", source, dst));
                assert_eq!(hop.cost, best, "{} -> {}", source, dst);

                let first = dist[&(source.clone(), hop.next_hop.clone())];
                let rest = dist[&(hop.next_hop.clone(), dst.clone())];
                assert_eq!(
                    first + rest,
                    best,
                    "{} -> {} via {} is not on a shortest path",
                    source,
                    dst,
                    hop.next_hop
                );
            }
        }
    }
}

fn star() -> Network {
    Network::new(&[
        ("rt0", "rt3", 9),
        ("rt1", "rt3", 4),
        ("rt2", "rt3", 7),
        ("rt3", "rt4", 2),
    ])
}

/// Deterministic pseudo-random connected graph: a ring plus chords.
fn mesh(size: usize, chords: usize, seed: u64) -> Vec<(String, String, Cost)> {
    let mut state = seed;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state
    };

    let name = |i: usize| format!("rt{}", i);
    let mut edges: Vec<(String, String, Cost)> = (0..size)
        .map(|i| (name(i), name((i + 1) % size), (next() % 20 + 1) as Cost))
        .collect();

    while edges.len() < size + chords {
        let (a, b) = ((next() as usize) % size, (next() as usize) % size);
        let duplicate = edges
            .iter()
            .any(|(x, y, _)| (x == &name(a) && y == &name(b)) || (x == &name(b) && y == &name(a)));
        if a != b && !duplicate {
            edges.push((name(a), name(b), (next() % 20 + 1) as Cost));
        }
    }
    edges
}

fn mesh_network(size: usize, chords: usize, seed: u64) -> Network {
    let edges = mesh(size, chords, seed);
    let borrowed: Vec<(&str, &str, Cost)> = edges
        .iter()
        .map(|(a, b, cost)| (a.as_str(), b.as_str(), *cost))
        .collect();
    Network::new(&borrowed)
}

#[test]
fn test_star_topology_next_hops() {
    let mut net = star();
    net.start();
    net.run_for(Duration::from_secs(10));

    assert_eq!(
        net.table("rt0"),
        btreemap! {
            id("rt1") => (id("rt3"), 13),
            id("rt2") => (id("rt3"), 16),
            id("rt3") => (id("rt3"), 9),
            id("rt4") => (id("rt3"), 11),
        }
    );
    net.assert_converged();
}

#[test]
fn test_star_topology_routes_use_attached_subnets() {
    let mut net = star();
    net.start();
    net.run_for(Duration::from_secs(10));

    // rt3-rt4 is wire 3, so 10.0.3.0/24; rt0 reaches it through rt3 on 10.0.0.0/24
    let rt0 = net.router("rt0");
    let route = rt0.routes().get(&"10.0.3.0/24".parse().unwrap()).unwrap();
    assert_eq!(route.gateway, Ipv4Addr::new(10, 0, 0, 3));
    assert_eq!(route.interface, "eth0");
    assert_eq!(route.metric, 9);
    assert_eq!(route.via, id("rt3"));

    // The attached subnet is never a learned route
    assert!(rt0.routes().get(&"10.0.0.0/24".parse().unwrap()).is_none());
    assert_eq!(rt0.routes().len(), 3);
}

#[test]
fn test_mesh_converges_to_shortest_paths() {
    for seed in [7, 1234, 98765] {
        let mut net = mesh_network(8, 6, seed);
        net.start();
        net.run_for(Duration::from_secs(15));
        net.assert_converged();
    }
}

#[test]
fn test_failed_link_without_alternate_path() {
    let mut net = star();
    net.start();
    net.run_for(Duration::from_secs(10));
    assert!(net.router("rt0").next_hops().get(&id("rt4")).is_some());

    net.cut("rt3", "rt4");
    net.run_for(Duration::from_secs(10));

    assert!(net.router("rt0").next_hops().get(&id("rt4")).is_none());
    assert_eq!(net.router("rt0").next_hops().len(), 3);
    assert!(net.router("rt4").next_hops().is_empty());
}

#[test]
fn test_failed_link_reroutes_over_ring() {
    let mut net = Network::new(&[
        ("rt0", "rt1", 1),
        ("rt1", "rt2", 1),
        ("rt2", "rt3", 1),
        ("rt3", "rt0", 10),
    ]);
    net.start();
    net.run_for(Duration::from_secs(10));
    assert_eq!(net.table("rt0")[&id("rt3")], (id("rt1"), 3));

    net.cut("rt1", "rt2");
    net.run_for(Duration::from_secs(10));

    assert_eq!(net.table("rt0")[&id("rt2")], (id("rt3"), 11));
    assert_eq!(net.table("rt0")[&id("rt3")], (id("rt3"), 10));
    net.assert_converged();
}

#[test]
fn test_flooding_sends_each_instance_once_per_link() {
    let mut net = mesh_network(6, 5, 42);
    net.start();
    net.run_for(Duration::from_secs(10));
    net.lsa_log.clear();

    // Spans one refresh of every router
    net.run_for(Duration::from_secs(25));
    assert!(!net.lsa_log.is_empty());

    let mut seen: HashMap<&Delivery, usize> = HashMap::new();
    for delivery in &net.lsa_log {
        *seen.entry(delivery).or_default() += 1;
    }
    let repeated: Vec<_> = seen.iter().filter(|(_, count)| **count > 1).collect();
    assert!(repeated.is_empty(), "repeated LSA transmissions: {:?}", repeated);
    net.assert_converged();
}

#[test]
fn test_steady_state_sends_only_hellos() {
    let mut net = star();
    net.start();
    net.run_for(Duration::from_secs(10));
    net.lsa_log.clear();

    net.run_for(Duration::from_secs(10));
    assert_eq!(net.lsa_log, vec![]);
    let stats = net.router("rt3").stats();
    assert_eq!(stats.malformed, 0);
    assert_eq!(stats.unknown_source, 0);
}
