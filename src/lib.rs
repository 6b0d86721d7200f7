//! A peer node implementation of the Kademlia distributed hash table.
//!
//! Nodes cooperatively store and retrieve content-addressed values over an
//! unreliable datagram transport. The crate provides the XOR-metric routing
//! table, the iterative bounded-concurrency lookup algorithm, and the
//! request/response correlation layer they depend on. A [`Node`] owns all of
//! its collaborators explicitly, so several nodes can live in one process.

mod contact;
mod error;
mod key;
mod network;
mod node;
mod routing;
mod rpc;
mod shortlist;
mod storage;

pub use self::contact::Contact;
pub use self::error::KademliaError;
pub use self::key::Key;
pub use self::network::{Network, Transport, UdpTransport};
pub use self::node::{Config, Node};
pub use self::rpc::{Payload, Rpc, RpcKind};

/// The number of bytes in a key.
const ID_LENGTH: usize = 20;

/// The maximum length of a datagram in bytes.
const MESSAGE_LENGTH: usize = 8196;

/// The number of k-buckets in the routing table.
const ROUTING_TABLE_SIZE: usize = ID_LENGTH * 8;

/// The default maximum number of entries in a k-bucket, which doubles as the
/// replication factor.
const REPLICATION_PARAM: usize = 20;

/// The default number of concurrent RPCs during one lookup round.
const CONCURRENCY_PARAM: usize = 3;

/// Default request timeout in milliseconds.
const REQUEST_TIMEOUT: u64 = 5000;

/// Default bucket refresh interval in seconds.
const BUCKET_REFRESH_INTERVAL: u64 = 3600;
