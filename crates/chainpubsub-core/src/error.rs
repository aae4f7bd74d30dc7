//! Client-level error types.

use thiserror::Error;

use crate::request::JsonRpcError;

/// Errors surfaced by the PubSub client.
///
/// Connection-level failures fan out to every outstanding waiter; every other
/// variant is local to the single request or notification that produced it.
#[derive(Debug, Error)]
pub enum PubSubError {
    /// The transport failed to open, or closed while the request was in flight.
    #[error("connection error: {0}")]
    Connection(String),

    /// A payload did not match the expected shape.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// An ack arrived but could not be used.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// JSON-RPC error object returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// Inbound bytes that are neither an ack nor a known notification.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The connect handshake did not complete in time.
    #[error("connect timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The client task has shut down.
    #[error("client closed")]
    Closed,
}

/// Ack-level protocol violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// A subscribe ack arrived without a usable numeric handle.
    #[error("subscription not established: {reason}")]
    SubscriptionNotEstablished { reason: String },

    /// The logical subscription was removed before its ack arrived.
    #[error("subscription withdrawn before it was acknowledged")]
    SubscriptionWithdrawn,
}

impl PubSubError {
    /// Returns `true` if the error was caused by the connection going away.
    ///
    /// These are the only errors worth retrying after a reconnect.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout { .. })
    }

    /// Returns `true` if this is a node-side JSON-RPC error.
    pub fn is_rpc_error(&self) -> bool {
        matches!(self, Self::Rpc(_))
    }

    /// Build a [`PubSubError::Connection`] from a reason string.
    pub fn connection(reason: impl Into<String>) -> Self {
        Self::Connection(reason.into())
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T, E = PubSubError> = std::result::Result<T, E>;
