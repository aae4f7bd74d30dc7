//! `PubSubClient` — the cloneable handle callers use to talk to the node.
//!
//! Every handle feeds the same connection manager task, so any number of
//! tasks can write, subscribe and observe concurrently over one socket.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::warn;

use chainpubsub_core::codec::MessageCodec;
use chainpubsub_core::error::{ProtocolError, PubSubError};
use chainpubsub_core::notification::{AccountNotification, SignatureConfirmation};
use chainpubsub_core::request::{RequestId, RpcParam};
use chainpubsub_core::transport::Connector;
use chainpubsub_core::types::{ConnectionStatus, SubscriptionHandle, SubscriptionKey};

use crate::config::PubSubConfig;
use crate::demux::BusMessage;
use crate::manager::{Command, ConnectionManager, SubscriptionGrant};
use crate::transport::WsConnector;

/// Handle to a persistent PubSub connection.
///
/// Cloning is cheap; all clones share one connection. The background task
/// disconnects once the last clone is dropped.
#[derive(Clone)]
pub struct PubSubClient {
    endpoint: Arc<str>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
}

impl PubSubClient {
    /// Start a client over `connector`. Nothing is dialled until the first
    /// connect, write or subscribe.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<C: Connector>(connector: C, config: PubSubConfig) -> Self {
        let endpoint: Arc<str> = Arc::from(connector.endpoint());
        let (cmd_tx, status) = ConnectionManager::spawn(Arc::new(connector), config);
        Self {
            endpoint,
            cmd_tx,
            status,
        }
    }

    /// Client over a WebSocket endpoint (`ws://` or `wss://`).
    pub fn with_url(url: impl Into<String>, config: PubSubConfig) -> Self {
        Self::new(WsConnector::new(url), config)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Receiver that observes every status change.
    pub fn status_changes(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Open the connection if it is not open or opening. Returns immediately.
    pub fn connect(&self) -> Result<(), PubSubError> {
        self.send(Command::Connect { done: None })
    }

    /// Connect and wait for the handshake to finish.
    pub async fn wait_connected(&self) -> Result<(), PubSubError> {
        let (done, rx) = oneshot::channel();
        self.send(Command::Connect { done: Some(done) })?;
        rx.await.map_err(|_| PubSubError::Closed)?
    }

    /// Unsubscribe every live subscription (best effort) and close the
    /// connection. Safe to call in any state.
    ///
    /// Subscriptions are remembered and come back on the next connect.
    pub async fn disconnect(&self) {
        let (done, rx) = oneshot::channel();
        if self.send(Command::Disconnect { done }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Send a request without waiting for its response.
    ///
    /// The id is returned before anything touches the network. If the client
    /// is not connected the request is queued and sent once the connection
    /// opens; any ack is discarded.
    pub fn write(
        &self,
        method: impl Into<String>,
        params: Vec<RpcParam>,
    ) -> Result<RequestId, PubSubError> {
        let id = RequestId::generate();
        self.send(Command::Write {
            id: id.clone(),
            method: method.into(),
            params,
            responder: None,
        })?;
        Ok(id)
    }

    /// Send a request and get a future for its response.
    ///
    /// Dropping the returned [`PendingResponse`] abandons the request.
    pub fn request(
        &self,
        method: impl Into<String>,
        params: Vec<RpcParam>,
    ) -> Result<PendingResponse, PubSubError> {
        let id = RequestId::generate();
        let (tx, rx) = oneshot::channel();
        self.send(Command::Write {
            id: id.clone(),
            method: method.into(),
            params,
            responder: Some(tx),
        })?;
        Ok(PendingResponse {
            id,
            rx,
            cmd_tx: self.cmd_tx.clone(),
            finished: false,
        })
    }

    /// Send a request and decode its result into `T`.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: impl Into<String>,
        params: Vec<RpcParam>,
    ) -> Result<T, PubSubError> {
        let value = self.request(method, params)?.await?;
        MessageCodec::decode(value)
    }

    /// Subscribe to changes of the account at `address`.
    ///
    /// Subscribing to an address that is already subscribed reuses the live
    /// subscription; only one subscribe request goes on the wire.
    pub async fn subscribe_account(
        &self,
        address: impl Into<String>,
    ) -> Result<AccountSubscription, PubSubError> {
        let key = SubscriptionKey::account(address);
        let grant = self.establish(key.clone()).await?;
        Ok(AccountSubscription {
            key,
            handle: grant.handle,
            receiver: grant.receiver,
            cmd_tx: self.cmd_tx.clone(),
        })
    }

    /// Stop receiving notifications for `address`.
    pub fn unsubscribe_account(&self, address: impl Into<String>) -> Result<(), PubSubError> {
        self.send(Command::Unsubscribe(SubscriptionKey::account(address)))
    }

    /// Wait for the first confirmation of `signature`.
    ///
    /// Resolves exactly once. Fails with a connection error if the connection
    /// drops before the confirmation arrives.
    pub async fn observe_signature_confirmation(
        &self,
        signature: impl Into<String>,
    ) -> Result<SignatureConfirmation, PubSubError> {
        let key = SubscriptionKey::signature(signature);
        let mut guard = AbandonGuard::new(key.clone(), self.cmd_tx.clone());

        let SubscriptionGrant { mut receiver, .. } = self.establish_unguarded(key).await?;
        loop {
            match receiver.recv().await {
                Ok(BusMessage::Notification(payload)) => {
                    guard.disarm();
                    return SignatureConfirmation::from_payload(payload);
                }
                Ok(BusMessage::ConnectionLost(reason)) => {
                    return Err(PubSubError::Connection(reason))
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => {
                    guard.disarm();
                    return Err(ProtocolError::SubscriptionWithdrawn.into());
                }
            }
        }
    }

    /// Register `key` and wait for its handle, withdrawing it if the caller
    /// gives up first.
    async fn establish(&self, key: SubscriptionKey) -> Result<SubscriptionGrant, PubSubError> {
        let mut guard = AbandonGuard::new(key.clone(), self.cmd_tx.clone());
        let grant = self.establish_unguarded(key).await?;
        guard.disarm();
        Ok(grant)
    }

    async fn establish_unguarded(
        &self,
        key: SubscriptionKey,
    ) -> Result<SubscriptionGrant, PubSubError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Subscribe { key, reply })?;
        rx.await.map_err(|_| PubSubError::Closed)?
    }

    fn send(&self, cmd: Command) -> Result<(), PubSubError> {
        self.cmd_tx.send(cmd).map_err(|_| PubSubError::Closed)
    }
}

impl std::fmt::Debug for PubSubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSubClient")
            .field("endpoint", &self.endpoint)
            .field("status", &self.status())
            .finish()
    }
}

/// Sends `Abandon` for a key unless disarmed.
struct AbandonGuard {
    key: Option<SubscriptionKey>,
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl AbandonGuard {
    fn new(key: SubscriptionKey, cmd_tx: mpsc::UnboundedSender<Command>) -> Self {
        Self {
            key: Some(key),
            cmd_tx,
        }
    }

    fn disarm(&mut self) {
        self.key = None;
    }
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let _ = self.cmd_tx.send(Command::Abandon(key));
        }
    }
}

/// Response to a [`PubSubClient::request`].
///
/// Resolves with the `result` of the matching ack, the server's error, or a
/// connection error if the connection drops first.
#[must_use = "dropping a PendingResponse abandons the request"]
pub struct PendingResponse {
    id: RequestId,
    rx: oneshot::Receiver<Result<Value, PubSubError>>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    finished: bool,
}

impl PendingResponse {
    pub fn id(&self) -> &RequestId {
        &self.id
    }
}

impl Future for PendingResponse {
    type Output = Result<Value, PubSubError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(result) => {
                this.finished = true;
                Poll::Ready(result.unwrap_or(Err(PubSubError::Closed)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.cmd_tx.send(Command::Cancel(self.id.clone()));
        }
    }
}

impl std::fmt::Debug for PendingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResponse").field("id", &self.id).finish()
    }
}

/// A live account subscription.
///
/// Notifications keep flowing until [`unsubscribe`](Self::unsubscribe) is
/// called. Dropping the value only stops listening; the subscription itself
/// stays registered for other listeners of the same address.
///
/// When the connection drops the subscription yields one connection error.
/// It resumes after the client reconnects, which happens on the next connect,
/// write or subscribe.
pub struct AccountSubscription {
    key: SubscriptionKey,
    handle: SubscriptionHandle,
    receiver: broadcast::Receiver<BusMessage>,
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl AccountSubscription {
    pub fn address(&self) -> &str {
        &self.key.target
    }

    /// Handle assigned by the server when the subscription was granted.
    /// A reconnect assigns a new one internally.
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle
    }

    /// Next notification. `None` once the subscription has been removed.
    pub async fn recv(&mut self) -> Option<Result<AccountNotification, PubSubError>> {
        loop {
            match self.receiver.recv().await {
                Ok(BusMessage::Notification(payload)) => {
                    return Some(AccountNotification::from_payload(payload))
                }
                Ok(BusMessage::ConnectionLost(reason)) => {
                    return Some(Err(PubSubError::Connection(reason)))
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(address = %self.key.target, skipped, "account listener lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Turn the subscription into a `Stream` of notifications.
    pub fn into_stream(
        self,
    ) -> impl Stream<Item = Result<AccountNotification, PubSubError>> + Send + 'static {
        futures::stream::unfold(self, |mut sub| async move {
            let item = sub.recv().await?;
            Some((item, sub))
        })
    }

    /// Remove the subscription for this address and tell the server.
    pub fn unsubscribe(self) -> Result<(), PubSubError> {
        self.cmd_tx
            .send(Command::Unsubscribe(self.key))
            .map_err(|_| PubSubError::Closed)
    }
}

impl std::fmt::Debug for AccountSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountSubscription")
            .field("address", &self.key.target)
            .field("handle", &self.handle)
            .finish()
    }
}
