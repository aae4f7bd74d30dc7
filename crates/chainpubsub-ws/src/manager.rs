//! Connection manager — the background task that owns the transport.
//!
//! The manager is the only place connection status, pending requests, the
//! subscription registry and the notification bus are mutated. Callers reach
//! it through a command channel, so every mutation happens in command order
//! on one task and writes to the transport are never interleaved.
//!
//! Reconnection is lazy: a dropped connection only moves the status to
//! `Disconnected`. The next write, subscribe or explicit connect opens a new
//! transport, and once it is up every remembered subscription is re-issued.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{self, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use chainpubsub_core::codec::MessageCodec;
use chainpubsub_core::error::{ProtocolError, PubSubError};
use chainpubsub_core::pending::{PendingRequests, Responder, ResponseSender};
use chainpubsub_core::registry::SubscriptionRegistry;
use chainpubsub_core::request::RequestId;
use chainpubsub_core::transport::{Connection, Connector, Outbound};
use chainpubsub_core::types::{Action, ConnectionStatus, SubscriptionHandle, SubscriptionKey};

use crate::config::PubSubConfig;
use crate::demux::{BusMessage, Demultiplexer, NotificationBus, Routed};

type ConnectFuture = Pin<Box<dyn Future<Output = Result<Connection, PubSubError>> + Send>>;
type ConnectSender = oneshot::Sender<Result<(), PubSubError>>;

/// A live subscription handed back to a subscriber.
pub(crate) struct SubscriptionGrant {
    pub handle: SubscriptionHandle,
    pub receiver: broadcast::Receiver<BusMessage>,
}

pub(crate) type GrantSender = oneshot::Sender<Result<SubscriptionGrant, PubSubError>>;

/// Requests from client handles to the manager task.
pub(crate) enum Command {
    Connect {
        done: Option<ConnectSender>,
    },
    Disconnect {
        done: oneshot::Sender<()>,
    },
    Write {
        id: RequestId,
        method: String,
        params: Vec<Value>,
        responder: Option<ResponseSender>,
    },
    /// The caller stopped waiting for `id`.
    Cancel(RequestId),
    Subscribe {
        key: SubscriptionKey,
        reply: GrantSender,
    },
    Unsubscribe(SubscriptionKey),
    /// A subscriber stopped waiting before its subscription was granted.
    Abandon(SubscriptionKey),
}

/// A subscriber waiting for the ack of its key's subscribe request.
struct SubscribeWaiter {
    reply: GrantSender,
    receiver: broadcast::Receiver<BusMessage>,
}

/// A write accepted while the transport was not yet open.
struct QueuedWrite {
    id: RequestId,
    method: String,
    text: String,
}

pub(crate) struct ConnectionManager {
    connector: Arc<dyn Connector>,
    config: PubSubConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    status: watch::Sender<ConnectionStatus>,
    conn: Option<Connection>,
    /// The in-flight handshake, shared by every caller that asked to connect.
    connecting: Option<ConnectFuture>,
    connect_waiters: Vec<ConnectSender>,
    outbox: Vec<QueuedWrite>,
    registry: SubscriptionRegistry,
    pending: PendingRequests,
    bus: NotificationBus,
    subscribe_waiters: HashMap<SubscriptionKey, Vec<SubscribeWaiter>>,
    heartbeat: Option<Interval>,
}

impl ConnectionManager {
    /// Start the manager task. Must be called from within a Tokio runtime.
    pub(crate) fn spawn(
        connector: Arc<dyn Connector>,
        config: PubSubConfig,
    ) -> (mpsc::UnboundedSender<Command>, watch::Receiver<ConnectionStatus>) {
        let (cmd_tx, commands) = mpsc::unbounded_channel();
        let (status, status_rx) = watch::channel(ConnectionStatus::Initializing);
        let bus = NotificationBus::new(config.notification_capacity);

        let manager = Self {
            connector,
            config,
            commands,
            status,
            conn: None,
            connecting: None,
            connect_waiters: Vec::new(),
            outbox: Vec::new(),
            registry: SubscriptionRegistry::new(),
            pending: PendingRequests::new(),
            bus,
            subscribe_waiters: HashMap::new(),
            heartbeat: None,
        };
        tokio::spawn(manager.run());

        (cmd_tx, status_rx)
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => {
                        debug!("all client handles dropped, shutting down");
                        self.disconnect().await;
                        return;
                    }
                },
                result = poll_connecting(&mut self.connecting) => {
                    self.connecting = None;
                    self.on_connect_result(result).await;
                }
                inbound = next_inbound(&mut self.conn) => self.on_inbound(inbound).await,
                () = next_heartbeat(&mut self.heartbeat) => self.on_heartbeat().await,
            }
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { done } => self.connect(done),
            Command::Disconnect { done } => {
                self.disconnect().await;
                let _ = done.send(());
            }
            Command::Write {
                id,
                method,
                params,
                responder,
            } => self.write(id, method, params, responder).await,
            Command::Cancel(id) => {
                if self.pending.cancel(&id) {
                    debug!(%id, "pending request abandoned by caller");
                }
            }
            Command::Subscribe { key, reply } => self.subscribe(key, reply).await,
            Command::Unsubscribe(key) => self.unsubscribe(key).await,
            Command::Abandon(key) => self.abandon(key).await,
        }
    }

    // ─── Status ──────────────────────────────────────────────────────────────

    fn current_status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    fn set_status(&mut self, next: ConnectionStatus) {
        let current = self.current_status();
        if current == next {
            return;
        }
        debug_assert!(
            current.can_transition_to(next),
            "illegal status transition {current} -> {next}"
        );
        self.status.send_replace(next);
        debug!(from = %current, to = %next, "connection status changed");
    }

    // ─── Connect / disconnect ────────────────────────────────────────────────

    fn connect(&mut self, done: Option<ConnectSender>) {
        if self.current_status() == ConnectionStatus::Connected {
            if let Some(done) = done {
                let _ = done.send(Ok(()));
            }
            return;
        }
        if let Some(done) = done {
            self.connect_waiters.push(done);
        }
        self.start_connect();
    }

    /// Open the transport unless a handshake is already running.
    fn start_connect(&mut self) {
        if !self.current_status().can_connect() {
            return;
        }
        info!(endpoint = %self.connector.endpoint(), "connecting");
        self.set_status(ConnectionStatus::Connecting);

        let connector = Arc::clone(&self.connector);
        let timeout = self.config.connect_timeout;
        self.connecting = Some(Box::pin(async move {
            match time::timeout(timeout, connector.connect()).await {
                Ok(result) => result,
                Err(_) => Err(PubSubError::Timeout {
                    ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                }),
            }
        }));
    }

    async fn on_connect_result(&mut self, result: Result<Connection, PubSubError>) {
        let conn = match result {
            Ok(conn) => conn,
            Err(e) => {
                warn!(endpoint = %self.connector.endpoint(), error = %e, "connect failed");
                self.teardown(&e.to_string()).await;
                return;
            }
        };

        self.conn = Some(conn);
        self.set_status(ConnectionStatus::Connected);
        info!(endpoint = %self.connector.endpoint(), "connected");

        self.heartbeat = self.config.heartbeat_interval.map(|period| {
            let mut interval = time::interval_at(time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });

        for done in self.connect_waiters.drain(..) {
            let _ = done.send(Ok(()));
        }

        self.replay_subscriptions().await;
        self.flush_outbox().await;
    }

    /// Best-effort unsubscribe of every live handle, then close.
    async fn disconnect(&mut self) {
        if self.current_status() == ConnectionStatus::Connected {
            for (key, handle) in self.registry.bound() {
                self.send_unsubscribe(&key, handle).await;
            }
        }
        info!(endpoint = %self.connector.endpoint(), "disconnecting");
        self.teardown("disconnected by client").await;
    }

    async fn connection_lost(&mut self, reason: &str) {
        warn!(endpoint = %self.connector.endpoint(), reason, "connection lost");
        self.teardown(reason).await;
    }

    /// Drop the transport and fail everything that was waiting on it.
    ///
    /// Desired subscriptions survive; their handles do not.
    async fn teardown(&mut self, reason: &str) {
        let was_live = matches!(
            self.current_status(),
            ConnectionStatus::Connecting | ConnectionStatus::Connected
        );

        self.connecting = None;
        self.heartbeat = None;
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.close().await {
                debug!(error = %e, "error while closing transport");
            }
        }
        self.set_status(ConnectionStatus::Disconnected);

        self.registry.invalidate_handles();
        for key in self.pending.fail_all(reason) {
            debug!(%key, "subscribe request failed by teardown");
        }
        for (_, waiters) in self.subscribe_waiters.drain() {
            for waiter in waiters {
                let _ = waiter.reply.send(Err(PubSubError::connection(reason)));
            }
        }
        for done in self.connect_waiters.drain(..) {
            let _ = done.send(Err(PubSubError::connection(reason)));
        }
        if !self.outbox.is_empty() {
            warn!(
                dropped = self.outbox.len(),
                "dropping writes queued for a connection that never opened"
            );
            self.outbox.clear();
        }

        if was_live {
            self.bus.connection_lost(reason);
        }
    }

    // ─── Write path ──────────────────────────────────────────────────────────

    async fn write(
        &mut self,
        id: RequestId,
        method: String,
        params: Vec<Value>,
        responder: Option<ResponseSender>,
    ) {
        let text = match MessageCodec::encode_call(&id, &method, params) {
            Ok(text) => text,
            Err(e) => {
                warn!(%id, %method, error = %e, "failed to encode request");
                if let Some(tx) = responder {
                    let _ = tx.send(Err(e));
                }
                return;
            }
        };

        if let Some(tx) = responder {
            if !self.pending.insert(id.clone(), Responder::Caller(tx)) {
                warn!(%id, "request id already pending, dropping duplicate");
                return;
            }
        }

        if self.current_status() == ConnectionStatus::Connected {
            self.send_text(&id, &method, text).await;
        } else {
            debug!(%id, %method, "queued until connected");
            self.outbox.push(QueuedWrite { id, method, text });
            self.start_connect();
        }
    }

    /// Send every write queued during the handshake, in arrival order.
    async fn flush_outbox(&mut self) {
        let mut queued = std::mem::take(&mut self.outbox).into_iter();
        for write in queued.by_ref() {
            if !self.send_text(&write.id, &write.method, write.text).await {
                break;
            }
        }
        let dropped = queued.count();
        if dropped > 0 {
            warn!(dropped, "connection lost while flushing queued writes");
        }
    }

    /// Write one request frame. On failure the connection is torn down and
    /// `false` is returned.
    async fn send_text(&mut self, id: &RequestId, method: &str, text: String) -> bool {
        let Some(conn) = self.conn.as_mut() else {
            debug!(%id, method, "not connected, frame not sent");
            return false;
        };
        match conn.send(Outbound::Text(text)).await {
            Ok(()) => {
                debug!(%id, method, "request sent");
                true
            }
            Err(e) => {
                warn!(%id, method, error = %e, "write failed");
                self.connection_lost(&e.to_string()).await;
                false
            }
        }
    }

    // ─── Subscriptions ───────────────────────────────────────────────────────

    async fn subscribe(&mut self, key: SubscriptionKey, reply: GrantSender) {
        let receiver = self.bus.listen(&key);
        if let Some(handle) = self.registry.handle_of(&key) {
            let _ = reply.send(Ok(SubscriptionGrant { handle, receiver }));
            return;
        }

        self.subscribe_waiters
            .entry(key.clone())
            .or_default()
            .push(SubscribeWaiter { reply, receiver });

        if self.registry.ensure(key.entity, &key.target) {
            debug!(%key, "subscription registered");
        }

        if self.current_status() == ConnectionStatus::Connected {
            if self.pending.subscribe_in_flight(&key).is_none() {
                self.issue_subscribe(key).await;
            }
        } else {
            // Issued by the replay once the connection is up.
            self.start_connect();
        }
    }

    async fn issue_subscribe(&mut self, key: SubscriptionKey) -> bool {
        let id = RequestId::generate();
        let method = key.entity.method(Action::Subscribe);
        let mut params = vec![Value::String(key.target.clone())];
        if let Some(commitment) = &self.config.commitment {
            params.push(json!({ "commitment": commitment }));
        }

        let text = match MessageCodec::encode_call(&id, method, params) {
            Ok(text) => text,
            Err(e) => {
                warn!(%key, error = %e, "failed to encode subscribe");
                return true;
            }
        };
        self.pending.insert(id.clone(), Responder::Subscribe(key));
        self.send_text(&id, method, text).await
    }

    /// Re-issue one subscribe per desired key on a fresh connection.
    async fn replay_subscriptions(&mut self) {
        let keys = self.registry.all();
        if !keys.is_empty() {
            info!(count = keys.len(), "re-subscribing");
        }
        for key in keys {
            if self.pending.subscribe_in_flight(&key).is_some() {
                continue;
            }
            if !self.issue_subscribe(key).await {
                break;
            }
        }
    }

    async fn unsubscribe(&mut self, key: SubscriptionKey) {
        let handle = self.registry.forget(&key);
        self.bus.close(&key);
        if let Some(waiters) = self.subscribe_waiters.remove(&key) {
            for waiter in waiters {
                let _ = waiter
                    .reply
                    .send(Err(ProtocolError::SubscriptionWithdrawn.into()));
            }
        }
        if let Some(handle) = handle {
            self.send_unsubscribe(&key, handle).await;
        }
        debug!(%key, "subscription removed");
    }

    /// Withdraw `key` once nobody is left waiting on it or listening to it.
    ///
    /// An in-flight subscribe stays pending; its ack is then orphaned and the
    /// server-side subscription cancelled.
    async fn abandon(&mut self, key: SubscriptionKey) {
        if let Some(waiters) = self.subscribe_waiters.get_mut(&key) {
            waiters.retain(|waiter| !waiter.reply.is_closed());
            if !waiters.is_empty() {
                return;
            }
            self.subscribe_waiters.remove(&key);
        }
        if self.registry.contains(&key) && self.bus.listener_count(&key) == 0 {
            debug!(%key, "subscriber went away, withdrawing");
            self.unsubscribe(key).await;
        }
    }

    /// Fire-and-forget: the ack, if any, is discarded on arrival.
    async fn send_unsubscribe(&mut self, key: &SubscriptionKey, handle: SubscriptionHandle) {
        if self.current_status() != ConnectionStatus::Connected {
            return;
        }
        let id = RequestId::generate();
        let method = key.entity.method(Action::Unsubscribe);
        match MessageCodec::encode_call(&id, method, vec![json!(handle.0)]) {
            Ok(text) => {
                self.send_text(&id, method, text).await;
            }
            Err(e) => warn!(%key, error = %e, "failed to encode unsubscribe"),
        }
    }

    fn grant_waiters(&mut self, key: &SubscriptionKey, handle: SubscriptionHandle) {
        for waiter in self.subscribe_waiters.remove(key).unwrap_or_default() {
            let _ = waiter.reply.send(Ok(SubscriptionGrant {
                handle,
                receiver: waiter.receiver,
            }));
        }
    }

    // ─── Inbound ─────────────────────────────────────────────────────────────

    async fn on_inbound(&mut self, inbound: Option<Result<Vec<u8>, PubSubError>>) {
        let bytes = match inbound {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => {
                self.connection_lost(&e.to_string()).await;
                return;
            }
            None => {
                self.connection_lost("connection closed by remote").await;
                return;
            }
        };

        let routed =
            Demultiplexer::new(&mut self.registry, &mut self.pending, &mut self.bus)
                .route_bytes(&bytes);

        match routed {
            Routed::Completed(id) => debug!(%id, "request acknowledged"),
            Routed::Subscribed { key, handle } => {
                debug!(%key, %handle, "subscription established");
                self.grant_waiters(&key, handle);
            }
            Routed::Orphaned { key, handle } => {
                debug!(%key, %handle, "ack for withdrawn subscription, cancelling it");
                self.send_unsubscribe(&key, handle).await;
            }
            Routed::SubscribeFailed { key, error } => {
                warn!(%key, %error, "subscription not established");
                self.registry.forget(&key);
                self.bus.close(&key);
                for waiter in self.subscribe_waiters.remove(&key).unwrap_or_default() {
                    let _ = waiter.reply.send(Err(error.clone().into()));
                }
            }
            Routed::Published {
                key,
                listeners,
                retired,
            } => debug!(%key, listeners, retired, "notification delivered"),
            Routed::Discarded => debug!("frame matched no pending request or subscription"),
            Routed::Malformed(reason) => warn!(%reason, "dropping malformed frame"),
        }
    }

    async fn on_heartbeat(&mut self) {
        let Some(conn) = self.conn.as_mut() else {
            return;
        };
        match conn.send(Outbound::Ping).await {
            Ok(()) => debug!("heartbeat ping sent"),
            Err(e) => {
                warn!(error = %e, "heartbeat ping failed");
                self.connection_lost(&e.to_string()).await;
            }
        }
    }
}

async fn poll_connecting(attempt: &mut Option<ConnectFuture>) -> Result<Connection, PubSubError> {
    match attempt {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn next_inbound(conn: &mut Option<Connection>) -> Option<Result<Vec<u8>, PubSubError>> {
    match conn {
        Some(conn) => conn.stream.next().await,
        None => std::future::pending().await,
    }
}

async fn next_heartbeat(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
