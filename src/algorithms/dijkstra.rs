use serde::Serialize;
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap};

use crate::network::Topology;
use crate::types::{Cost, RouterId};

/// Shortest path from the source to one destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShortestPath {
    pub cost: Cost,
    /// First router after the source on the path.
    pub next_hop: RouterId,
    pub path: Vec<RouterId>,
}

#[derive(Debug, PartialEq, Eq)]
struct State {
    cost: Cost,
    router: RouterId,
}

impl Ord for State {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cost
            .cmp(&other.cost)
            .then_with(|| self.router.cmp(&other.router))
    }
}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Label {
    cost: Cost,
    previous: Option<RouterId>,
    next_hop: Option<RouterId>,
}

/// Runs Dijkstra over `topology` from `source`.
///
/// Unreachable routers are absent from the result. When two paths to a
/// router have the same cost, the one whose first hop has the lower router
/// id is kept.
pub fn calculate_shortest_paths(
    topology: &Topology,
    source: &RouterId,
) -> BTreeMap<RouterId, ShortestPath> {
    let mut labels: BTreeMap<RouterId, Label> = BTreeMap::new();
    let mut heap = BinaryHeap::new();

    labels.insert(
        source.clone(),
        Label {
            cost: 0,
            previous: None,
            next_hop: None,
        },
    );
    heap.push(Reverse(State {
        cost: 0,
        router: source.clone(),
    }));

    while let Some(Reverse(State { cost, router })) = heap.pop() {
        // Skip if we've already found a better path
        if labels.get(&router).is_some_and(|label| cost > label.cost) {
            continue;
        }

        let first_hop = labels.get(&router).and_then(|label| label.next_hop.clone());

        for (neighbor, link_cost) in topology.get_neighbors(&router) {
            if neighbor == source {
                continue;
            }

            let new_cost = cost.saturating_add(link_cost);
            if new_cost == Cost::MAX {
                continue;
            }
            let candidate_hop = first_hop.clone().unwrap_or_else(|| neighbor.clone());

            let known = labels
                .get(neighbor)
                .map(|label| (label.cost, label.next_hop.clone()));

            match known {
                Some((known_cost, _)) if new_cost > known_cost => {}
                Some((known_cost, known_hop)) if new_cost == known_cost => {
                    if known_hop.is_some_and(|hop| candidate_hop < hop) {
                        if let Some(label) = labels.get_mut(neighbor) {
                            label.previous = Some(router.clone());
                            label.next_hop = Some(candidate_hop);
                        }
                    }
                }
                _ => {
                    labels.insert(
                        neighbor.clone(),
                        Label {
                            cost: new_cost,
                            previous: Some(router.clone()),
                            next_hop: Some(candidate_hop),
                        },
                    );
                    heap.push(Reverse(State {
                        cost: new_cost,
                        router: neighbor.clone(),
                    }));
                }
            }
        }
    }

    labels
        .iter()
        .filter_map(|(destination, label)| {
            let next_hop = label.next_hop.clone()?;
            Some((
                destination.clone(),
                ShortestPath {
                    cost: label.cost,
                    next_hop,
                    path: reconstruct_path(&labels, destination),
                },
            ))
        })
        .collect()
}

fn reconstruct_path(labels: &BTreeMap<RouterId, Label>, dest: &RouterId) -> Vec<RouterId> {
    let mut path = Vec::new();
    let mut current = Some(dest.clone());

    while let Some(router) = current {
        current = labels.get(&router).and_then(|label| label.previous.clone());
        path.push(router);
    }

    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn id(s: &str) -> RouterId {
        RouterId::new(s).unwrap()
    }

    fn undirected(edges: &[(&str, &str, Cost)]) -> Topology {
        let mut topology = Topology::new();
        for (a, b, cost) in edges {
            topology.add_edge(&id(a), &id(b), *cost);
            topology.add_edge(&id(b), &id(a), *cost);
        }
        topology
    }

    fn summary(paths: &BTreeMap<RouterId, ShortestPath>) -> Vec<(String, String, Cost)> {
        paths
            .iter()
            .map(|(dst, p)| (dst.to_string(), p.next_hop.to_string(), p.cost))
            .collect()
    }

    #[test]
    fn test_star_through_rt3() {
        let topology = undirected(&[
            ("rt0", "rt3", 9),
            ("rt1", "rt3", 4),
            ("rt2", "rt3", 7),
            ("rt3", "rt4", 2),
        ]);
        let paths = calculate_shortest_paths(&topology, &id("rt0"));

        assert_eq!(
            summary(&paths),
            vec![
                ("rt1".to_string(), "rt3".to_string(), 13),
                ("rt2".to_string(), "rt3".to_string(), 16),
                ("rt3".to_string(), "rt3".to_string(), 9),
                ("rt4".to_string(), "rt3".to_string(), 11),
            ]
        );
        assert_eq!(paths[&id("rt2")].path, vec![id("rt0"), id("rt3"), id("rt2")]);
    }

    #[test]
    fn test_prefers_cheaper_multi_hop_path() {
        let topology = undirected(&[("a", "b", 10), ("a", "c", 1), ("c", "b", 2)]);
        let paths = calculate_shortest_paths(&topology, &id("a"));
        assert_eq!(paths[&id("b")].cost, 3);
        assert_eq!(paths[&id("b")].next_hop, id("c"));
    }

    #[test]
    fn test_equal_cost_tie_prefers_lower_first_hop() {
        // rt0 -> rt2 -> rt9 and rt0 -> rt10 -> rt9 both cost 2
        let topology = undirected(&[
            ("rt0", "rt10", 1),
            ("rt0", "rt2", 1),
            ("rt10", "rt9", 1),
            ("rt2", "rt9", 1),
        ]);
        let paths = calculate_shortest_paths(&topology, &id("rt0"));
        assert_eq!(paths[&id("rt9")].next_hop, id("rt2"));
        assert_eq!(paths[&id("rt9")].cost, 2);
    }

    #[test]
    fn test_unreachable_destinations_omitted() {
        let topology = undirected(&[("rt0", "rt1", 1), ("rt2", "rt3", 1)]);
        let paths = calculate_shortest_paths(&topology, &id("rt0"));
        assert_eq!(paths.keys().cloned().collect::<Vec<_>>(), vec![id("rt1")]);
    }

    #[test]
    fn test_source_not_in_result() {
        let topology = undirected(&[("rt0", "rt1", 1)]);
        let paths = calculate_shortest_paths(&topology, &id("rt0"));
        assert!(!paths.contains_key(&id("rt0")));
    }

    #[test]
    fn test_recomputation_is_idempotent() {
        let topology = undirected(&[
            ("rt0", "rt1", 3),
            ("rt1", "rt2", 3),
            ("rt0", "rt2", 6),
            ("rt2", "rt3", 1),
        ]);
        let first = calculate_shortest_paths(&topology, &id("rt0"));
        let second = calculate_shortest_paths(&topology, &id("rt0"));
        assert_eq!(first, second);
    }
}
