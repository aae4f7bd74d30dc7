//! In-memory connector for driving `PubSubClient` against a scripted node.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use chainpubsub_core::error::PubSubError;
use chainpubsub_core::transport::{Connection, Connector, Outbound};

const WAIT: Duration = Duration::from_secs(10);

/// How long to watch for frames that should never arrive.
pub const QUIET: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct MockConnector {
    accepted: mpsc::UnboundedSender<MockServer>,
    attempts: Arc<AtomicUsize>,
    refuse: Arc<AtomicUsize>,
    stall: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new() -> (Self, MockNode) {
        let (accepted, rx) = mpsc::unbounded_channel();
        let attempts = Arc::new(AtomicUsize::new(0));
        let refuse = Arc::new(AtomicUsize::new(0));
        let stall = Arc::new(AtomicUsize::new(0));
        let connector = Self {
            accepted,
            attempts: Arc::clone(&attempts),
            refuse: Arc::clone(&refuse),
            stall: Arc::clone(&stall),
        };
        (
            connector,
            MockNode {
                accepted: rx,
                attempts,
                refuse,
                stall,
            },
        )
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Connection, PubSubError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.stall) {
            std::future::pending::<()>().await;
        }
        if take_one(&self.refuse) {
            return Err(PubSubError::connection("connection refused"));
        }

        let (out_tx, out_rx) = fmpsc::unbounded::<Outbound>();
        let (in_tx, in_rx) = fmpsc::unbounded::<Result<Vec<u8>, PubSubError>>();
        let sink = out_tx.sink_map_err(|e| PubSubError::connection(e.to_string()));
        let _ = self.accepted.send(MockServer {
            outbound: out_rx,
            inbound: in_tx,
        });
        Ok(Connection::new(sink, in_rx))
    }

    fn endpoint(&self) -> &str {
        "mock://node"
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Test-side view of every connection the client opens.
pub struct MockNode {
    accepted: mpsc::UnboundedReceiver<MockServer>,
    attempts: Arc<AtomicUsize>,
    refuse: Arc<AtomicUsize>,
    stall: Arc<AtomicUsize>,
}

impl MockNode {
    /// Wait for the client to open its next connection.
    pub async fn accept(&mut self) -> MockServer {
        tokio::time::timeout(WAIT, self.accepted.recv())
            .await
            .expect("client never connected")
            .expect("connector dropped")
    }

    /// True if no further connection is opened within `QUIET`.
    pub async fn no_new_connection(&mut self) -> bool {
        tokio::time::timeout(QUIET, self.accepted.recv()).await.is_err()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn refuse_next(&self, n: usize) {
        self.refuse.store(n, Ordering::SeqCst);
    }

    pub fn stall_next(&self, n: usize) {
        self.stall.store(n, Ordering::SeqCst);
    }
}

/// The node's end of one connection.
pub struct MockServer {
    outbound: fmpsc::UnboundedReceiver<Outbound>,
    inbound: fmpsc::UnboundedSender<Result<Vec<u8>, PubSubError>>,
}

impl MockServer {
    /// Next frame the client wrote, pings included.
    pub async fn next_frame(&mut self) -> Option<Outbound> {
        tokio::time::timeout(WAIT, self.outbound.next())
            .await
            .expect("client wrote nothing")
    }

    /// Next JSON-RPC request, skipping pings.
    pub async fn next_request(&mut self) -> Value {
        loop {
            match self.next_frame().await {
                Some(Outbound::Text(text)) => {
                    return serde_json::from_str(&text).expect("client wrote invalid JSON")
                }
                Some(Outbound::Ping) => continue,
                None => panic!("client closed the connection"),
            }
        }
    }

    /// True if the client writes nothing within `QUIET`.
    pub async fn is_quiet(&mut self) -> bool {
        tokio::time::timeout(QUIET, self.outbound.next()).await.is_err()
    }

    /// Wait until the client closes its write half.
    pub async fn closed_by_client(&mut self) -> bool {
        loop {
            match tokio::time::timeout(WAIT, self.outbound.next()).await {
                Ok(None) => return true,
                Ok(Some(_)) => continue,
                Err(_) => return false,
            }
        }
    }

    pub fn push_raw(&self, bytes: impl Into<Vec<u8>>) {
        let _ = self.inbound.unbounded_send(Ok(bytes.into()));
    }

    pub fn push(&self, frame: Value) {
        self.push_raw(frame.to_string());
    }

    pub fn ack(&self, request: &Value, result: Value) {
        self.push(json!({ "jsonrpc": "2.0", "id": request["id"], "result": result }));
    }

    pub fn ack_error(&self, request: &Value, code: i64, message: &str) {
        self.push(json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "error": { "code": code, "message": message }
        }));
    }

    pub fn notify(&self, method: &str, handle: u64, result: Value) {
        self.push(json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": { "subscription": handle, "result": result }
        }));
    }

    /// Simulate a transport error.
    pub fn fail(&self, reason: &str) {
        let _ = self
            .inbound
            .unbounded_send(Err(PubSubError::connection(reason)));
    }
}

/// Account payload in the context-wrapped shape nodes send.
pub fn account_payload(slot: u64, lamports: u64) -> Value {
    json!({
        "context": { "slot": slot },
        "value": {
            "lamports": lamports,
            "owner": "11111111111111111111111111111111",
            "data": ["", "base64"],
            "executable": false,
            "rentEpoch": 361,
            "space": 0
        }
    })
}

pub fn signature_payload(slot: u64) -> Value {
    json!({ "context": { "slot": slot }, "value": { "err": null } })
}
