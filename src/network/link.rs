use ipnet::Ipv4Net;
use serde::Serialize;
use std::net::Ipv4Addr;

use crate::types::{Cost, LinkId};

/// One attached interface: local address, attached subnet and cost.
/// Created once at startup and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    pub id: LinkId,
    pub name: String,
    pub address: Ipv4Net,
    pub cost: Cost,
}

impl Link {
    pub fn new(id: LinkId, name: String, address: Ipv4Net, cost: Cost) -> Self {
        Self {
            id,
            name,
            address,
            cost,
        }
    }

    pub fn local_address(&self) -> Ipv4Addr {
        self.address.addr()
    }

    pub fn subnet(&self) -> Ipv4Net {
        self.address.trunc()
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        self.address.broadcast()
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.address.contains(&addr)
    }
}

/// The static link table of a router.
#[derive(Debug, Clone, Default)]
pub struct LinkTable {
    links: Vec<Link>,
}

impl LinkTable {
    /// Link ids must match their position in `links`.
    pub fn new(links: Vec<Link>) -> Self {
        debug_assert!(links.iter().enumerate().all(|(i, l)| l.id == LinkId(i)));
        Self { links }
    }

    pub fn get(&self, id: LinkId) -> Option<&Link> {
        self.links.get(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Link> {
        self.links.iter()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Finds the link whose subnet contains `source`. On overlapping
    /// subnets the longest prefix wins.
    pub fn find_by_source(&self, source: Ipv4Addr) -> Option<&Link> {
        self.links
            .iter()
            .filter(|link| link.contains(source))
            .max_by_key(|link| link.address.prefix_len())
    }

    pub fn is_local_address(&self, addr: Ipv4Addr) -> bool {
        self.links.iter().any(|link| link.local_address() == addr)
    }

    /// Attached subnets, sorted and deduplicated.
    pub fn subnets(&self) -> Vec<Ipv4Net> {
        let mut subnets: Vec<Ipv4Net> = self.links.iter().map(Link::subnet).collect();
        subnets.sort();
        subnets.dedup();
        subnets
    }
}
