use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Cost, MAX_COST, RouterId};

/// Datagrams larger than this are dropped before parsing.
pub const MAX_MESSAGE_SIZE: usize = 8192;

/// Upper bound on adjacencies and networks carried by one LSA.
pub const MAX_LSA_ENTRIES: usize = 256;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("datagram of {0} bytes exceeds {MAX_MESSAGE_SIZE}")]
    Oversized(usize),
    #[error("malformed datagram: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid field: {0}")]
    InvalidField(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolMessage {
    Hello(HelloMessage),
    Lsa(Lsa),
}

/// Keepalive sent on every link each hello interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloMessage {
    pub router_id: RouterId,
    /// Cost of the link as configured by the sender.
    pub cost: Cost,
}

/// Link-state advertisement: one router's description of itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lsa {
    pub originator: RouterId,
    pub sequence: u64,
    /// Seconds since origination.
    pub age: u32,
    pub adjacencies: Vec<Adjacency>,
    /// Subnets attached to the originator.
    #[serde(default)]
    pub networks: Vec<Ipv4Net>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Adjacency {
    pub neighbor: RouterId,
    pub cost: Cost,
}

impl Lsa {
    pub fn cost_to(&self, neighbor: &RouterId) -> Option<Cost> {
        self.adjacencies
            .iter()
            .filter(|adj| &adj.neighbor == neighbor)
            .map(|adj| adj.cost)
            .min()
    }

    pub fn lists(&self, neighbor: &RouterId) -> bool {
        self.adjacencies.iter().any(|adj| &adj.neighbor == neighbor)
    }
}

impl ProtocolMessage {
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parses a datagram. Anything that does not look like a well-formed
    /// message is rejected here and never reaches protocol state.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(DecodeError::Oversized(data.len()));
        }

        let message: ProtocolMessage = serde_json::from_slice(data)?;
        message.validate()?;
        Ok(message)
    }

    fn validate(&self) -> Result<(), DecodeError> {
        let valid_cost = |cost: Cost| (1..=MAX_COST).contains(&cost);

        match self {
            ProtocolMessage::Hello(hello) => {
                if !valid_cost(hello.cost) {
                    return Err(DecodeError::InvalidField("hello cost"));
                }
            }
            ProtocolMessage::Lsa(lsa) => {
                if lsa.adjacencies.len() > MAX_LSA_ENTRIES {
                    return Err(DecodeError::InvalidField("too many adjacencies"));
                }
                if lsa.networks.len() > MAX_LSA_ENTRIES {
                    return Err(DecodeError::InvalidField("too many networks"));
                }
                if lsa.adjacencies.iter().any(|adj| !valid_cost(adj.cost)) {
                    return Err(DecodeError::InvalidField("adjacency cost"));
                }
                if lsa.adjacencies.iter().any(|adj| adj.neighbor == lsa.originator) {
                    return Err(DecodeError::InvalidField("self adjacency"));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn id(s: &str) -> RouterId {
        RouterId::new(s).unwrap()
    }

    #[test]
    fn test_wire_format() {
        let hello = ProtocolMessage::Hello(HelloMessage {
            router_id: id("rt1"),
            cost: 4,
        });
        assert_eq!(
            String::from_utf8(hello.encode().unwrap()).unwrap(),
            r#"{"type":"hello","router_id":"rt1","cost":4}"#
        );

        let lsa = br#"{"type":"lsa","originator":"rt3","sequence":7,"age":2,
            "adjacencies":[{"neighbor":"rt0","cost":9},{"neighbor":"rt4","cost":2}],
            "networks":["10.0.1.0/24"]}"#;
        let ProtocolMessage::Lsa(lsa) = ProtocolMessage::decode(lsa).unwrap() else {
            panic!("expected an LSA");
        };
        assert_eq!(lsa.originator, id("rt3"));
        assert_eq!(lsa.cost_to(&id("rt4")), Some(2));
        assert_eq!(lsa.networks, vec!["10.0.1.0/24".parse::<Ipv4Net>().unwrap()]);
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let data = br#"{"type":"hello","router_id":"rt1","cost":1,"timestamp":12.5}"#;
        assert!(ProtocolMessage::decode(data).is_ok());
    }

    #[test]
    fn test_malformed_rejected() {
        assert!(matches!(
            ProtocolMessage::decode(b"HELLO:rt1"),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            ProtocolMessage::decode(br#"{"type":"hello","router_id":"","cost":1}"#),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            ProtocolMessage::decode(br#"{"type":"hello","router_id":"rt1","cost":-3}"#),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            ProtocolMessage::decode(br#"{"type":"bye","router_id":"rt1"}"#),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            ProtocolMessage::decode(br#"{"type":"hello","router_id":"rt1","cost":0}"#),
            Err(DecodeError::InvalidField(_))
        ));
        let self_loop = br#"{"type":"lsa","originator":"rt1","sequence":1,"age":0,
            "adjacencies":[{"neighbor":"rt1","cost":1}]}"#;
        assert!(matches!(
            ProtocolMessage::decode(self_loop),
            Err(DecodeError::InvalidField(_))
        ));
    }

    #[test]
    fn test_oversized_rejected() {
        let data = vec![b' '; MAX_MESSAGE_SIZE + 1];
        assert!(matches!(
            ProtocolMessage::decode(&data),
            Err(DecodeError::Oversized(_))
        ));
    }
}
