use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::network::{Link, LinkTable};
use crate::protocol::PROTOCOL_PORT;
use crate::types::{Cost, LinkId, MAX_COST, RouterId, RouterIdError};

/// Errors raised while loading or validating the startup configuration.
/// All of them are fatal: the router refuses to start.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseJson {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("no router id configured (set router_id, --router-id or CONTAINER_NAME)")]
    MissingRouterId,

    #[error("invalid router id: {0}")]
    InvalidRouterId(#[from] RouterIdError),

    #[error("no links configured")]
    NoLinks,

    #[error("link {0} is configured twice")]
    DuplicateLink(String),

    #[error("link {name} has invalid cost {cost} (expected 1..={max})", max = MAX_COST)]
    InvalidCost { name: String, cost: Cost },

    #[error("link {0} has no address and none could be found on the interface")]
    UnresolvedAddress(String),

    #[error("invalid timers: {0}")]
    InvalidTimers(&'static str),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub router_id: Option<String>,
    pub port: u16,
    pub hello_interval: u32,
    pub dead_interval: u32,
    pub lsa_refresh_interval: u32,
    pub max_age: u32,
    pub min_lsa_interval: u32,
    pub install_routes: bool,
    pub links: Vec<LinkConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Interface name, also used as the `dev` of installed routes.
    pub name: String,
    /// Local address with the prefix length of the attached subnet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Ipv4Net>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<Cost>,
}

/// Protocol timers in their runtime form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolTimers {
    pub hello_interval: Duration,
    pub dead_interval: Duration,
    pub refresh_interval: Duration,
    pub max_age: Duration,
    pub min_lsa_interval: Duration,
}

impl Default for ProtocolTimers {
    fn default() -> Self {
        Self {
            hello_interval: Duration::from_secs(10),
            dead_interval: Duration::from_secs(40),
            refresh_interval: Duration::from_secs(1800),
            max_age: Duration::from_secs(3600),
            min_lsa_interval: Duration::from_secs(5),
        }
    }
}

impl ProtocolTimers {
    /// Two copies of one LSA whose ages differ by less than this are the
    /// same instance.
    pub fn max_age_diff(&self) -> Duration {
        self.max_age / 4
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            router_id: None,
            port: PROTOCOL_PORT,
            hello_interval: 10,
            dead_interval: 40,
            lsa_refresh_interval: 1800, // 30 minutes
            max_age: 3600,              // 1 hour
            min_lsa_interval: 5,
            install_routes: true,
            links: vec![],
        }
    }
}

impl RouterConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::ParseJson {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn router_id(&self) -> Result<RouterId, ConfigError> {
        let id = self.router_id.as_deref().ok_or(ConfigError::MissingRouterId)?;
        Ok(RouterId::new(id)?)
    }

    pub fn timers(&self) -> Result<ProtocolTimers, ConfigError> {
        if self.hello_interval == 0 || self.min_lsa_interval == 0 {
            return Err(ConfigError::InvalidTimers("intervals must be non-zero"));
        }
        if self.dead_interval <= self.hello_interval {
            return Err(ConfigError::InvalidTimers(
                "dead_interval must exceed hello_interval",
            ));
        }
        if self.lsa_refresh_interval == 0 || self.lsa_refresh_interval >= self.max_age {
            return Err(ConfigError::InvalidTimers(
                "lsa_refresh_interval must be non-zero and below max_age",
            ));
        }

        let secs = |s: u32| Duration::from_secs(u64::from(s));
        Ok(ProtocolTimers {
            hello_interval: secs(self.hello_interval),
            dead_interval: secs(self.dead_interval),
            refresh_interval: secs(self.lsa_refresh_interval),
            max_age: secs(self.max_age),
            min_lsa_interval: secs(self.min_lsa_interval),
        })
    }

    /// Builds the link table, filling missing addresses through `lookup`
    /// (interface name to IPv4 address and prefix).
    pub fn link_table<F>(&self, lookup: F) -> Result<LinkTable, ConfigError>
    where
        F: Fn(&str) -> Option<Ipv4Net>,
    {
        if self.links.is_empty() {
            return Err(ConfigError::NoLinks);
        }

        let mut seen = HashSet::new();
        let mut links = Vec::with_capacity(self.links.len());

        for (index, link) in self.links.iter().enumerate() {
            if !seen.insert(link.name.as_str()) {
                return Err(ConfigError::DuplicateLink(link.name.clone()));
            }

            let cost = link.cost.unwrap_or(1);
            if cost == 0 || cost > MAX_COST {
                return Err(ConfigError::InvalidCost {
                    name: link.name.clone(),
                    cost,
                });
            }

            let address = link
                .address
                .or_else(|| lookup(&link.name))
                .ok_or_else(|| ConfigError::UnresolvedAddress(link.name.clone()))?;

            links.push(Link::new(LinkId(index), link.name.clone(), address, cost));
        }

        Ok(LinkTable::new(links))
    }
}
