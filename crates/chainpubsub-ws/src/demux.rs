//! Notification demultiplexer and fan-out bus.
//!
//! Every classified inbound frame goes through [`Demultiplexer::route`]:
//! acks complete their pending slot, notifications are published to the bus
//! channel of the logical subscription their handle resolves to. Frames that
//! match nothing are discarded without touching unrelated state.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::broadcast;

use chainpubsub_core::codec::{Frame, MessageCodec};
use chainpubsub_core::error::{ProtocolError, PubSubError};
use chainpubsub_core::pending::PendingRequests;
use chainpubsub_core::registry::SubscriptionRegistry;
use chainpubsub_core::request::{JsonRpcError, RequestId};
use chainpubsub_core::types::{Entity, SubscriptionHandle, SubscriptionKey};

/// An item delivered to subscription listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum BusMessage {
    /// The `result` of a notification for this subscription.
    Notification(Value),
    /// The connection dropped; the subscription will be replayed on the next
    /// connection.
    ConnectionLost(String),
}

/// One broadcast channel per logical subscription.
#[derive(Debug)]
pub struct NotificationBus {
    channels: HashMap<SubscriptionKey, broadcast::Sender<BusMessage>>,
    capacity: usize,
}

impl NotificationBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Attach a new listener to `key`, creating its channel if needed.
    pub fn listen(&mut self, key: &SubscriptionKey) -> broadcast::Receiver<BusMessage> {
        let capacity = self.capacity;
        self.channels
            .entry(key.clone())
            .or_insert_with(|| broadcast::channel(capacity).0)
            .subscribe()
    }

    /// Publish to every listener of `key`. Returns the number of listeners
    /// that received it.
    pub fn publish(&self, key: &SubscriptionKey, message: BusMessage) -> usize {
        self.channels
            .get(key)
            .and_then(|tx| tx.send(message).ok())
            .unwrap_or(0)
    }

    /// Tell every listener on every channel that the connection dropped.
    pub fn connection_lost(&self, reason: &str) {
        for tx in self.channels.values() {
            let _ = tx.send(BusMessage::ConnectionLost(reason.to_string()));
        }
    }

    /// Drop the channel for `key`; its listeners observe end-of-stream once
    /// buffered messages are consumed.
    pub fn close(&mut self, key: &SubscriptionKey) -> bool {
        self.channels.remove(key).is_some()
    }

    pub fn listener_count(&self, key: &SubscriptionKey) -> usize {
        self.channels.get(key).map_or(0, |tx| tx.receiver_count())
    }
}

/// What routing a frame did.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    /// A caller's pending request was completed.
    Completed(RequestId),
    /// A subscribe ack bound a handle to a still-desired key.
    Subscribed {
        key: SubscriptionKey,
        handle: SubscriptionHandle,
    },
    /// A subscribe ack arrived for a key that was withdrawn meanwhile; the
    /// server-side subscription should be cancelled.
    Orphaned {
        key: SubscriptionKey,
        handle: SubscriptionHandle,
    },
    /// A subscribe ack carried no usable handle.
    SubscribeFailed {
        key: SubscriptionKey,
        error: ProtocolError,
    },
    /// A notification was delivered to `listeners` listeners. One-shot
    /// subscriptions are `retired` after their first delivery.
    Published {
        key: SubscriptionKey,
        listeners: usize,
        retired: bool,
    },
    /// Late, duplicate, or stale frame with nothing to deliver to.
    Discarded,
    /// Unclassifiable frame.
    Malformed(String),
}

/// Borrowing view over the client's lookup tables for routing one frame.
pub struct Demultiplexer<'a> {
    pub registry: &'a mut SubscriptionRegistry,
    pub pending: &'a mut PendingRequests,
    pub bus: &'a mut NotificationBus,
}

impl<'a> Demultiplexer<'a> {
    pub fn new(
        registry: &'a mut SubscriptionRegistry,
        pending: &'a mut PendingRequests,
        bus: &'a mut NotificationBus,
    ) -> Self {
        Self {
            registry,
            pending,
            bus,
        }
    }

    /// Classify raw bytes and route them.
    pub fn route_bytes(&mut self, bytes: &[u8]) -> Routed {
        self.route(MessageCodec::classify(bytes))
    }

    pub fn route(&mut self, frame: Frame) -> Routed {
        match frame {
            Frame::RequestAck { id, payload } => self.route_ack(id, payload),
            Frame::Notification {
                entity,
                handle,
                payload,
            } => self.route_notification(entity, handle, payload),
            Frame::Malformed(reason) => Routed::Malformed(reason),
        }
    }

    fn route_ack(
        &mut self,
        id: RequestId,
        payload: Result<Value, JsonRpcError>,
    ) -> Routed {
        let Some(responder) = self.pending.take(&id) else {
            return Routed::Discarded;
        };

        let Some(key) = responder.complete(payload.clone().map_err(PubSubError::Rpc)) else {
            return Routed::Completed(id);
        };

        let handle = match payload {
            Ok(value) => match MessageCodec::decode_handle(&value) {
                Ok(handle) => handle,
                Err(PubSubError::Protocol(error)) => return Routed::SubscribeFailed { key, error },
                Err(other) => {
                    return Routed::SubscribeFailed {
                        key,
                        error: ProtocolError::SubscriptionNotEstablished {
                            reason: other.to_string(),
                        },
                    }
                }
            },
            Err(rpc) => {
                return Routed::SubscribeFailed {
                    key,
                    error: ProtocolError::SubscriptionNotEstablished {
                        reason: rpc.to_string(),
                    },
                }
            }
        };

        if self.registry.bind(&key, handle) {
            Routed::Subscribed { key, handle }
        } else {
            Routed::Orphaned { key, handle }
        }
    }

    fn route_notification(
        &mut self,
        entity: Entity,
        handle: SubscriptionHandle,
        payload: Value,
    ) -> Routed {
        let Some(key) = self.registry.resolve(handle).cloned() else {
            return Routed::Discarded;
        };
        if key.entity != entity {
            return Routed::Discarded;
        }

        let listeners = self.bus.publish(&key, BusMessage::Notification(payload));

        let retired = key.entity.is_one_shot();
        if retired {
            self.registry.forget(&key);
            self.bus.close(&key);
        }

        Routed::Published {
            key,
            listeners,
            retired,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainpubsub_core::pending::Responder;
    use serde_json::json;
    use tokio::sync::oneshot;

    struct Tables {
        registry: SubscriptionRegistry,
        pending: PendingRequests,
        bus: NotificationBus,
    }

    impl Tables {
        fn new() -> Self {
            Self {
                registry: SubscriptionRegistry::new(),
                pending: PendingRequests::new(),
                bus: NotificationBus::new(16),
            }
        }

        fn route(&mut self, raw: &str) -> Routed {
            Demultiplexer::new(&mut self.registry, &mut self.pending, &mut self.bus)
                .route_bytes(raw.as_bytes())
        }
    }

    #[test]
    fn ack_completes_only_its_own_request() {
        let mut t = Tables::new();
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        t.pending.insert("a".into(), Responder::Caller(tx1));
        t.pending.insert("b".into(), Responder::Caller(tx2));

        assert_eq!(t.route(r#"{"id":"b","result":2}"#), Routed::Completed("b".into()));
        assert_eq!(rx2.try_recv().unwrap().unwrap(), json!(2));
        assert!(rx1.try_recv().is_err());
        assert!(t.pending.contains(&"a".into()));
    }

    #[test]
    fn unknown_ack_is_discarded() {
        let mut t = Tables::new();
        assert_eq!(t.route(r#"{"id":"zzz","result":true}"#), Routed::Discarded);
    }

    #[test]
    fn rpc_error_ack_reaches_caller() {
        let mut t = Tables::new();
        let (tx, mut rx) = oneshot::channel();
        t.pending.insert("a".into(), Responder::Caller(tx));
        t.route(r#"{"id":"a","error":{"code":-32601,"message":"Method not found"}}"#);
        let err = rx.try_recv().unwrap().unwrap_err();
        assert!(err.is_rpc_error());
    }

    #[test]
    fn subscribe_ack_binds_then_routes_notification() {
        let mut t = Tables::new();
        let key = SubscriptionKey::account("Acct1");
        t.registry.ensure(Entity::Account, "Acct1");
        t.pending.insert("r1".into(), Responder::Subscribe(key.clone()));
        let mut rx = t.bus.listen(&key);

        assert_eq!(
            t.route(r#"{"id":"r1","result":42}"#),
            Routed::Subscribed {
                key: key.clone(),
                handle: SubscriptionHandle(42)
            }
        );

        let routed = t.route(
            r#"{"method":"accountNotification","params":{"subscription":42,"result":{"lamports":100}}}"#,
        );
        assert_eq!(
            routed,
            Routed::Published {
                key,
                listeners: 1,
                retired: false
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            BusMessage::Notification(json!({"lamports": 100}))
        );
    }

    #[test]
    fn subscribe_ack_without_handle_fails() {
        let mut t = Tables::new();
        let key = SubscriptionKey::account("Acct1");
        t.registry.ensure(Entity::Account, "Acct1");
        t.pending.insert("r1".into(), Responder::Subscribe(key.clone()));
        assert!(matches!(
            t.route(r#"{"id":"r1","result":null}"#),
            Routed::SubscribeFailed { .. }
        ));
    }

    #[test]
    fn ack_for_withdrawn_key_is_orphaned() {
        let mut t = Tables::new();
        let key = SubscriptionKey::account("Acct1");
        t.pending.insert("r1".into(), Responder::Subscribe(key.clone()));
        assert_eq!(
            t.route(r#"{"id":"r1","result":9}"#),
            Routed::Orphaned {
                key,
                handle: SubscriptionHandle(9)
            }
        );
    }

    #[test]
    fn signature_notification_retires_subscription() {
        let mut t = Tables::new();
        let key = SubscriptionKey::signature("Sig1");
        t.registry.ensure(Entity::Signature, "Sig1");
        t.registry.bind(&key, SubscriptionHandle(5));
        let _rx = t.bus.listen(&key);

        let raw = r#"{"method":"signatureNotification","params":{"subscription":5,"result":{"value":{"err":null},"context":{"slot":1}}}}"#;
        assert!(matches!(t.route(raw), Routed::Published { retired: true, .. }));
        assert_eq!(t.route(raw), Routed::Discarded);
        assert!(t.registry.is_empty());
    }

    #[test]
    fn notification_for_other_entity_is_not_misrouted() {
        let mut t = Tables::new();
        let key = SubscriptionKey::account("Acct1");
        t.registry.ensure(Entity::Account, "Acct1");
        t.registry.bind(&key, SubscriptionHandle(3));
        let raw = r#"{"method":"signatureNotification","params":{"subscription":3,"result":{}}}"#;
        assert_eq!(t.route(raw), Routed::Discarded);
        assert!(t.registry.contains(&key));
    }

    #[test]
    fn stale_handle_is_discarded() {
        let mut t = Tables::new();
        let raw = r#"{"method":"accountNotification","params":{"subscription":77,"result":{}}}"#;
        assert_eq!(t.route(raw), Routed::Discarded);
    }

    #[test]
    fn malformed_bytes_touch_nothing() {
        let mut t = Tables::new();
        let (tx, mut rx) = oneshot::channel();
        t.pending.insert("a".into(), Responder::Caller(tx));
        assert!(matches!(t.route("{not json"), Routed::Malformed(_)));
        assert!(rx.try_recv().is_err());
        assert_eq!(t.pending.len(), 1);
    }
}
