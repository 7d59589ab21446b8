//! Entity identifiers: server-assigned vs. client placeholder.

use core::str::FromStr;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::DomainError;

/// Identifier of a product or sale.
///
/// `Remote` ids are assigned by the server. `Local` ids are placeholders handed
/// out while a create has not reached the server yet; the two spaces never
/// compare equal even when the numbers match.
///
/// On the wire a remote id is a bare integer (the shape the API uses), a
/// placeholder is `{"local": n}`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityId {
    Local(u64),
    Remote(u64),
}

impl EntityId {
    pub fn is_local(&self) -> bool {
        matches!(self, EntityId::Local(_))
    }

    /// The server id, if this is one.
    pub fn remote(&self) -> Option<u64> {
        match self {
            EntityId::Remote(id) => Some(*id),
            EntityId::Local(_) => None,
        }
    }
}

impl core::fmt::Display for EntityId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            EntityId::Remote(id) => write!(f, "{id}"),
            EntityId::Local(id) => write!(f, "local-{id}"),
        }
    }
}

impl FromStr for EntityId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ctor, digits): (fn(u64) -> EntityId, &str) = match s.strip_prefix("local-") {
            Some(rest) => (EntityId::Local, rest),
            None => (EntityId::Remote, s),
        };
        digits
            .parse::<u64>()
            .map(ctor)
            .map_err(|e| DomainError::invalid_id(format!("EntityId '{s}': {e}")))
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Remote(u64),
    Local { local: u64 },
}

impl Serialize for EntityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let repr = match *self {
            EntityId::Remote(id) => IdRepr::Remote(id),
            EntityId::Local(local) => IdRepr::Local { local },
        };
        repr.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match IdRepr::deserialize(deserializer)? {
            IdRepr::Remote(id) => EntityId::Remote(id),
            IdRepr::Local { local } => EntityId::Local(local),
        })
    }
}
