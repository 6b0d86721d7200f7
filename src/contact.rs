use std::fmt::{Debug, Formatter, Result};

use serde_derive::{Deserialize, Serialize};

use crate::key::Key;

/// A peer's identity and network address.
///
/// Contacts are plain values and are freely cloned; a bucket or shortlist
/// always owns its own copies. Distance to a target is computed on demand
/// with [`Contact::distance_to`] rather than cached on the contact, so an
/// ordering is never based on a stale distance.
#[derive(PartialEq, Eq, Hash, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: Key,
    pub ip: String,
    pub port: u16,
}

impl Contact {
    /// Constructs a new `Contact`.
    pub fn new(id: Key, ip: &str, port: u16) -> Self {
        Contact {
            id,
            ip: ip.to_string(),
            port,
        }
    }

    /// The `ip:port` form consumed by the datagram transport.
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// The XOR distance from this contact's id to `target`.
    pub fn distance_to(&self, target: &Key) -> Key {
        self.id.xor(target)
    }
}

impl Debug for Contact {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "{} - {:?}", self.address(), self.id)
    }
}
