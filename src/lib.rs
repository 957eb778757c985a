//! Link-state routing engine: Hello neighbor discovery, LSA flooding,
//! a link-state database, Dijkstra shortest paths and diff-based route
//! installation.

pub mod algorithms;
pub mod config;
pub mod network;
pub mod protocol;
pub mod router;
pub mod types;

pub use config::{ConfigError, LinkConfig, ProtocolTimers, RouterConfig};
pub use router::{Event, Router, RouterSnapshot, Stats, Transmit};
pub use types::{Cost, LinkId, RouterId};
