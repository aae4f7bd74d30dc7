//! chainpubsub-core — foundation types for ChainPubSub.
//!
//! # Overview
//!
//! ChainPubSub multiplexes JSON-RPC requests and push notifications over one
//! persistent socket to a ledger node. The core crate defines the pieces that
//! do not depend on a particular transport:
//!
//! - [`MessageCodec`] / [`Frame`] — request encoding and inbound classification
//! - [`SubscriptionRegistry`] — logical subscriptions and their live handles
//! - [`PendingRequests`] — in-flight request ids and their completion slots
//! - [`Connector`] / [`Connection`] — the byte-stream transport abstraction
//! - [`PubSubError`] — structured error type
//! - [`notification`] module — typed account and signature payloads

pub mod codec;
pub mod error;
pub mod notification;
pub mod pending;
pub mod registry;
pub mod request;
pub mod transport;
pub mod types;

pub use codec::{Frame, MessageCodec};
pub use error::{ProtocolError, PubSubError};
pub use notification::{AccountInfo, AccountNotification, RpcContext, RpcResponse, SignatureConfirmation};
pub use pending::{PendingRequests, Responder, ResponseSender};
pub use registry::SubscriptionRegistry;
pub use request::{JsonRpcError, JsonRpcRequest, RequestId, RpcParam};
pub use transport::{Connection, Connector, FrameSink, FrameStream, Outbound};
pub use types::{Action, ConnectionStatus, Entity, SubscriptionHandle, SubscriptionKey};
