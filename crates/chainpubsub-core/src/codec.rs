//! Message codec — request encoding, inbound frame classification and
//! typed payload decoding.
//!
//! Classification rules, applied in order:
//! 1. a top-level `id` and no `method` → [`Frame::RequestAck`]
//! 2. a `method` naming a known notification plus a numeric
//!    `params.subscription` → [`Frame::Notification`]
//! 3. anything else → [`Frame::Malformed`]

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ProtocolError, PubSubError};
use crate::request::{JsonRpcError, JsonRpcRequest, RequestId, RpcParam};
use crate::types::{Entity, SubscriptionHandle};

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Response to a request this client sent.
    RequestAck {
        id: RequestId,
        payload: Result<Value, JsonRpcError>,
    },
    /// Push notification for a live subscription.
    Notification {
        entity: Entity,
        handle: SubscriptionHandle,
        payload: Value,
    },
    /// Unclassifiable bytes, with a human-readable reason.
    Malformed(String),
}

impl Frame {
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }
}

/// Stateless JSON codec for the PubSub wire protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageCodec;

impl MessageCodec {
    /// Serialize a request to its wire text.
    pub fn encode(req: &JsonRpcRequest) -> Result<String, PubSubError> {
        Ok(serde_json::to_string(req)?)
    }

    /// Build and serialize a request in one step.
    pub fn encode_call(
        id: &RequestId,
        method: &str,
        params: Vec<RpcParam>,
    ) -> Result<String, PubSubError> {
        Self::encode(&JsonRpcRequest::new(id.clone(), method, params))
    }

    /// Parse raw inbound bytes into a generic JSON tree.
    pub fn parse(bytes: &[u8]) -> Result<Value, PubSubError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Classify raw inbound bytes. Never fails; bad input becomes
    /// [`Frame::Malformed`].
    pub fn classify(bytes: &[u8]) -> Frame {
        match Self::parse(bytes) {
            Ok(value) => Self::classify_value(value),
            Err(e) => Frame::Malformed(format!("invalid JSON: {e}")),
        }
    }

    /// Classify an already-parsed JSON tree.
    pub fn classify_value(value: Value) -> Frame {
        let Value::Object(mut obj) = value else {
            return Frame::Malformed("frame is not a JSON object".into());
        };

        if obj.contains_key("id") && !obj.contains_key("method") {
            let id = match obj.remove("id") {
                Some(Value::String(s)) => RequestId(s),
                Some(Value::Number(n)) => RequestId(n.to_string()),
                other => {
                    return Frame::Malformed(format!("ack with unusable id: {other:?}"));
                }
            };
            let payload = match obj.remove("error") {
                Some(err) => match serde_json::from_value::<JsonRpcError>(err) {
                    Ok(err) => Err(err),
                    Err(e) => return Frame::Malformed(format!("invalid error object: {e}")),
                },
                None => Ok(obj.remove("result").unwrap_or(Value::Null)),
            };
            return Frame::RequestAck { id, payload };
        }

        let Some(method) = obj.get("method").and_then(Value::as_str).map(str::to_owned) else {
            return Frame::Malformed("frame has neither an id nor a method".into());
        };
        let Some(entity) = Entity::from_notification_method(&method) else {
            return Frame::Malformed(format!("unknown notification method `{method}`"));
        };
        let Some(Value::Object(mut params)) = obj.remove("params") else {
            return Frame::Malformed(format!("`{method}` without params object"));
        };
        let Some(handle) = params.get("subscription").and_then(Value::as_u64) else {
            return Frame::Malformed(format!("`{method}` without numeric subscription"));
        };

        Frame::Notification {
            entity,
            handle: SubscriptionHandle(handle),
            payload: params.remove("result").unwrap_or(Value::Null),
        }
    }

    /// Decode a payload into the caller's expected type.
    pub fn decode<T: DeserializeOwned>(payload: Value) -> Result<T, PubSubError> {
        Ok(serde_json::from_value(payload)?)
    }

    /// Decode a subscribe ack result into a [`SubscriptionHandle`].
    pub fn decode_handle(payload: &Value) -> Result<SubscriptionHandle, PubSubError> {
        payload
            .as_u64()
            .map(SubscriptionHandle)
            .ok_or_else(|| {
                ProtocolError::SubscriptionNotEstablished {
                    reason: format!("expected a numeric subscription id, got {payload}"),
                }
                .into()
            })
    }
}
