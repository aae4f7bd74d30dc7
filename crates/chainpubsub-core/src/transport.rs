//! The `Connector` trait — the byte-stream abstraction the client runs over.
//!
//! A connector opens one [`Connection`] per handshake. The connection is a
//! sink of outbound frames plus an ordered stream of inbound bytes; the
//! stream ending (or yielding an error) means the transport is gone.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream};

use crate::error::PubSubError;

/// A frame written to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Encoded JSON-RPC request text.
    Text(String),
    /// Transport-level liveness ping.
    Ping,
}

pub type FrameSink = Pin<Box<dyn Sink<Outbound, Error = PubSubError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, PubSubError>> + Send>>;

/// One open transport: write half and read half.
pub struct Connection {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Connection {
    pub fn new<S, R>(sink: S, stream: R) -> Self
    where
        S: Sink<Outbound, Error = PubSubError> + Send + 'static,
        R: Stream<Item = Result<Vec<u8>, PubSubError>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }

    /// Write one frame. Writes are never interleaved: the sink is only ever
    /// driven by its single owner.
    pub async fn send(&mut self, frame: Outbound) -> Result<(), PubSubError> {
        self.sink.send(frame).await
    }

    /// Close the write half, flushing anything buffered.
    pub async fn close(mut self) -> Result<(), PubSubError> {
        self.sink.close().await
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Opens transports to a single endpoint.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` so the client task can own them.
///
/// # Object Safety
/// The trait is object-safe and can be stored as `Arc<dyn Connector>`.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Perform the handshake and return the open connection.
    async fn connect(&self) -> Result<Connection, PubSubError>;

    /// Endpoint identifier (URL or name), used in logs.
    fn endpoint(&self) -> &str;
}
