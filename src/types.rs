use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Link cost as configured on an interface and carried in LSAs.
pub type Cost = u32;

/// Largest cost a single link may carry.
pub const MAX_COST: Cost = 0xffff;

/// Longest router identifier accepted from configuration or the wire.
pub const MAX_ROUTER_ID_LEN: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouterIdError {
    #[error("router id is empty")]
    Empty,
    #[error("router id is longer than {MAX_ROUTER_ID_LEN} bytes")]
    TooLong,
    #[error("router id {0:?} contains whitespace or control characters")]
    InvalidCharacter(String),
}

/// Identifier of a router (`rt0`, `rt12`, ...).
///
/// Ordering is "natural": identifiers sharing a textual prefix compare by
/// their numeric suffix, so `rt2 < rt10`. SPF uses this order to break
/// equal-cost ties.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RouterId(String);

impl RouterId {
    pub fn new(id: impl Into<String>) -> Result<Self, RouterIdError> {
        let id = id.into();
        if id.is_empty() {
            return Err(RouterIdError::Empty);
        }
        if id.len() > MAX_ROUTER_ID_LEN {
            return Err(RouterIdError::TooLong);
        }
        if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(RouterIdError::InvalidCharacter(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn natural_key(&self) -> (&str, Option<u64>) {
        let split = self
            .0
            .char_indices()
            .rev()
            .find(|(_, c)| !c.is_ascii_digit())
            .map_or(0, |(i, c)| i + c.len_utf8());
        let (prefix, digits) = self.0.split_at(split);
        (prefix, digits.parse().ok())
    }
}

impl Ord for RouterId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.natural_key()
            .cmp(&other.natural_key())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for RouterId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl TryFrom<String> for RouterId {
    type Error = RouterIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl std::str::FromStr for RouterId {
    type Err = RouterIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl From<RouterId> for String {
    fn from(id: RouterId) -> Self {
        id.0
    }
}

impl fmt::Display for RouterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Index of a link in the router's link table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LinkId(pub usize);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link{}", self.0)
    }
}
