use serde_derive::{Deserialize, Serialize};

use crate::contact::Contact;
use crate::error::KademliaError;
use crate::key::Key;

/// The four RPC kinds of the protocol. Together with the direction flag on
/// the envelope they form the eight valid wire message types.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcKind {
    Ping,
    Store,
    FindNode,
    FindValue,
}

/// The optional payload of an envelope: a key for lookups and stores, raw
/// bytes for values, and a contact list for lookup answers.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Payload {
    pub key: Option<Key>,
    pub data: Option<Vec<u8>>,
    pub contacts: Option<Vec<Contact>>,
}

impl Payload {
    /// A payload carrying only a key.
    pub fn with_key(key: Key) -> Self {
        Payload {
            key: Some(key),
            ..Payload::default()
        }
    }

    /// A payload carrying a value.
    pub fn with_data(data: Vec<u8>) -> Self {
        Payload {
            data: Some(data),
            ..Payload::default()
        }
    }

    /// A payload carrying a contact list.
    pub fn with_contacts(contacts: Vec<Contact>) -> Self {
        Payload {
            contacts: Some(contacts),
            ..Payload::default()
        }
    }
}

/// A wire envelope, one per datagram.
///
/// A response always carries the `id` of the request it answers; the
/// correlation layer matches the two on that token alone.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Rpc {
    pub id: Key,
    pub kind: RpcKind,
    pub is_response: bool,
    pub source: Contact,
    pub destination: Contact,
    pub payload: Option<Payload>,
}

impl Rpc {
    /// Builds a request envelope with a fresh random id.
    pub fn request(
        kind: RpcKind,
        source: Contact,
        destination: Contact,
        payload: Option<Payload>,
    ) -> Self {
        Rpc {
            id: Key::rand(),
            kind,
            is_response: false,
            source,
            destination,
            payload,
        }
    }

    /// Builds the response to `request`, reusing its id and reversing the
    /// direction.
    pub fn response(request: &Rpc, source: Contact, payload: Option<Payload>) -> Self {
        Rpc {
            id: request.id,
            kind: request.kind,
            is_response: true,
            source,
            destination: request.source.clone(),
            payload,
        }
    }

    /// Serializes the envelope for the wire.
    pub fn encode(&self) -> Result<Vec<u8>, KademliaError> {
        bincode::serialize(self).map_err(|err| KademliaError::Transport(err.to_string()))
    }

    /// Deserializes an envelope from a received datagram.
    pub fn decode(data: &[u8]) -> Result<Rpc, KademliaError> {
        bincode::deserialize(data).map_err(|err| KademliaError::InvalidRpc(err.to_string()))
    }

    /// Checks that the (kind, direction) pair carries its mandatory payload.
    /// Messages failing this check are dropped by the receiver without a
    /// response.
    pub fn validate(&self) -> Result<(), KademliaError> {
        let payload = self.payload.as_ref();
        let valid = match (self.kind, self.is_response) {
            (RpcKind::Ping, _) => true,
            (RpcKind::Store, false) => {
                payload.map_or(false, |p| p.key.is_some() && p.data.is_some())
            }
            (RpcKind::Store, true) => payload.map_or(false, |p| p.key.is_some()),
            (RpcKind::FindNode, false) | (RpcKind::FindValue, false) => {
                payload.map_or(false, |p| p.key.is_some())
            }
            (RpcKind::FindNode, true) => payload.map_or(false, |p| p.contacts.is_some()),
            (RpcKind::FindValue, true) => {
                payload.map_or(false, |p| p.data.is_some() || p.contacts.is_some())
            }
        };
        if valid {
            Ok(())
        } else {
            Err(KademliaError::InvalidRpc(format!(
                "{:?} {} with missing payload",
                self.kind,
                if self.is_response {
                    "response"
                } else {
                    "request"
                },
            )))
        }
    }
}
