//! Typed notification payloads.
//!
//! Nodes wrap most results in an `{ context: { slot }, value }` envelope, but
//! some send the bare value. Both shapes decode to the same types here.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::MessageCodec;
use crate::error::PubSubError;

/// Slot context attached to a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcContext {
    pub slot: u64,
}

/// `{ context, value }` result envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse<T> {
    pub context: RpcContext,
    pub value: T,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MaybeWrapped<T> {
    Wrapped(RpcResponse<T>),
    Bare(T),
}

/// Decode either envelope shape into `(slot, value)`.
fn decode_with_context<T: serde::de::DeserializeOwned>(
    payload: Value,
) -> Result<(Option<u64>, T), PubSubError> {
    Ok(match MessageCodec::decode::<MaybeWrapped<T>>(payload)? {
        MaybeWrapped::Wrapped(r) => (Some(r.context.slot), r.value),
        MaybeWrapped::Bare(v) => (None, v),
    })
}

/// On-chain account state as pushed by `accountNotification`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    pub lamports: u64,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub executable: Option<bool>,
    #[serde(default)]
    pub rent_epoch: Option<u64>,
    #[serde(default)]
    pub space: Option<u64>,
}

/// One account change.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountNotification {
    /// Slot the change was observed at, when the node reports one.
    pub slot: Option<u64>,
    pub account: AccountInfo,
}

impl AccountNotification {
    pub fn from_payload(payload: Value) -> Result<Self, PubSubError> {
        let (slot, account) = decode_with_context(payload)?;
        Ok(Self { slot, account })
    }
}

#[derive(Deserialize)]
struct SignatureResult {
    #[serde(default)]
    err: Option<Value>,
}

/// Outcome of a `signatureNotification`.
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureConfirmation {
    pub slot: Option<u64>,
    /// Transaction error as reported by the node, `None` on success.
    pub err: Option<Value>,
}

impl SignatureConfirmation {
    pub fn from_payload(payload: Value) -> Result<Self, PubSubError> {
        let (slot, result) = decode_with_context::<SignatureResult>(payload)?;
        Ok(Self {
            slot,
            err: result.err.filter(|e| !e.is_null()),
        })
    }

    pub fn is_success(&self) -> bool {
        self.err.is_none()
    }
}
