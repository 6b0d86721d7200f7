use thiserror::Error;

/// Errors surfaced by node operations.
///
/// Transport-level failures are recovered locally wherever a fallback exists
/// (pruning a dead contact, evicting a stale bucket entry) and only reach the
/// caller from the outermost operations.
#[derive(Debug, Error)]
pub enum KademliaError {
    /// An identifier failed to decode to the fixed key width.
    #[error("malformed identifier: {0}")]
    MalformedId(String),

    /// An inbound message carried an unrecognized or inconsistent kind.
    #[error("invalid rpc: {0}")]
    InvalidRpc(String),

    /// No correlated response arrived within the configured window.
    #[error("request timed out")]
    Timeout,

    /// A send or receive failed at the transport layer.
    #[error("transport error: {0}")]
    Transport(String),

    /// A value lookup exhausted the network without finding the value.
    #[error("value not found")]
    NotFound,

    /// No peer acknowledged a store request.
    #[error("no peer accepted the value")]
    StoreFailed,

    /// The bootstrap contact did not answer the initial ping.
    #[error("bootstrap contact unreachable")]
    BootstrapUnreachable,
}
