//! Pending request table.
//!
//! Maps an in-flight request id to the single place its ack must go. Each
//! entry is taken out of the table exactly once, either by a matching ack or
//! by teardown, so a slot can never be completed twice.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::PubSubError;
use crate::request::RequestId;
use crate::types::SubscriptionKey;

/// Single-shot completion channel handed to a caller awaiting an ack.
pub type ResponseSender = oneshot::Sender<Result<Value, PubSubError>>;

/// Where an ack for a given request id is delivered.
#[derive(Debug)]
pub enum Responder {
    /// A caller awaiting the raw result.
    Caller(ResponseSender),
    /// A subscribe request issued on behalf of a logical subscription.
    Subscribe(SubscriptionKey),
}

impl Responder {
    /// Complete a caller slot. Subscribe slots are returned untouched so the
    /// owner can bind the handle.
    pub fn complete(self, result: Result<Value, PubSubError>) -> Option<SubscriptionKey> {
        match self {
            Self::Caller(tx) => {
                // The receiver may already be gone if the caller gave up.
                let _ = tx.send(result);
                None
            }
            Self::Subscribe(key) => Some(key),
        }
    }
}

/// In-flight requests keyed by their caller-generated id.
#[derive(Debug, Default)]
pub struct PendingRequests {
    entries: HashMap<RequestId, Responder>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter. Returns `false` and leaves the existing entry in
    /// place if `id` is already pending.
    pub fn insert(&mut self, id: RequestId, responder: Responder) -> bool {
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(id, responder);
        true
    }

    /// Remove and return the waiter for `id`.
    pub fn take(&mut self, id: &RequestId) -> Option<Responder> {
        self.entries.remove(id)
    }

    /// Drop the waiter for `id` without completing it (caller gave up).
    pub fn cancel(&mut self, id: &RequestId) -> bool {
        self.entries.remove(id).is_some()
    }

    /// The subscribe request currently in flight for `key`, if any.
    pub fn subscribe_in_flight(&self, key: &SubscriptionKey) -> Option<&RequestId> {
        self.entries.iter().find_map(|(id, r)| match r {
            Responder::Subscribe(k) if k == key => Some(id),
            _ => None,
        })
    }

    /// Fail every caller with a connection error built by `reason` and
    /// return the subscribe slots that were in flight.
    pub fn fail_all(&mut self, reason: &str) -> Vec<SubscriptionKey> {
        self.entries
            .drain()
            .filter_map(|(_, responder)| responder.complete(Err(PubSubError::connection(reason))))
            .collect()
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fulfil_exactly_once() {
        let mut table = PendingRequests::new();
        let (tx, mut rx) = oneshot::channel();
        let id = RequestId::from("r1");
        assert!(table.insert(id.clone(), Responder::Caller(tx)));

        let responder = table.take(&id).unwrap();
        assert!(responder.complete(Ok(json!(42))).is_none());
        assert_eq!(rx.try_recv().unwrap().unwrap(), json!(42));

        assert!(table.take(&id).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let mut table = PendingRequests::new();
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        assert!(table.insert("r1".into(), Responder::Caller(tx1)));
        assert!(!table.insert("r1".into(), Responder::Caller(tx2)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn fail_all_fails_callers_and_returns_subscribes() {
        let mut table = PendingRequests::new();
        let (tx, mut rx) = oneshot::channel();
        table.insert("r1".into(), Responder::Caller(tx));
        let key = SubscriptionKey::account("Acct1");
        table.insert("r2".into(), Responder::Subscribe(key.clone()));

        let keys = table.fail_all("socket closed");
        assert_eq!(keys, vec![key]);
        assert!(table.is_empty());

        let err = rx.try_recv().unwrap().unwrap_err();
        assert!(err.is_connection_error());
    }

    #[test]
    fn cancel_removes_entry() {
        let mut table = PendingRequests::new();
        let (tx, _rx) = oneshot::channel();
        table.insert("r1".into(), Responder::Caller(tx));
        assert!(table.cancel(&"r1".into()));
        assert!(!table.cancel(&"r1".into()));
    }

    #[test]
    fn finds_in_flight_subscribe() {
        let mut table = PendingRequests::new();
        let key = SubscriptionKey::signature("Sig1");
        table.insert("r7".into(), Responder::Subscribe(key.clone()));
        assert_eq!(table.subscribe_in_flight(&key), Some(&RequestId::from("r7")));
        assert!(table
            .subscribe_in_flight(&SubscriptionKey::account("Sig1"))
            .is_none());
    }
}
