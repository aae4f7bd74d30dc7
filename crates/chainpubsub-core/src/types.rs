//! Subscription identity and connection status types.

use serde::{Deserialize, Serialize};

/// The kind of ledger entity a subscription watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Entity {
    Account,
    Signature,
}

/// Subscription lifecycle action, used to build wire method names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Subscribe,
    Unsubscribe,
}

impl Entity {
    pub const ALL: [Entity; 2] = [Entity::Account, Entity::Signature];

    /// Wire prefix, e.g. `"account"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::Signature => "signature",
        }
    }

    /// `"<entity><Action>"`, e.g. `accountSubscribe` or `signatureUnsubscribe`.
    pub fn method(&self, action: Action) -> &'static str {
        match (self, action) {
            (Self::Account, Action::Subscribe) => "accountSubscribe",
            (Self::Account, Action::Unsubscribe) => "accountUnsubscribe",
            (Self::Signature, Action::Subscribe) => "signatureSubscribe",
            (Self::Signature, Action::Unsubscribe) => "signatureUnsubscribe",
        }
    }

    /// Method name carried by push notifications for this entity.
    pub fn notification_method(&self) -> &'static str {
        match self {
            Self::Account => "accountNotification",
            Self::Signature => "signatureNotification",
        }
    }

    /// Reverse lookup from a notification method name.
    pub fn from_notification_method(method: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|e| e.notification_method() == method)
    }

    /// Whether the server retires the subscription after its first notification.
    pub fn is_one_shot(&self) -> bool {
        matches!(self, Self::Signature)
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A caller's durable interest in one (entity, target) pair.
///
/// `target` is an account address for [`Entity::Account`] and a transaction
/// signature for [`Entity::Signature`]. Independent of any connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionKey {
    pub entity: Entity,
    pub target: String,
}

impl SubscriptionKey {
    pub fn new(entity: Entity, target: impl Into<String>) -> Self {
        Self {
            entity,
            target: target.into(),
        }
    }

    pub fn account(address: impl Into<String>) -> Self {
        Self::new(Entity::Account, address)
    }

    pub fn signature(signature: impl Into<String>) -> Self {
        Self::new(Entity::Signature, signature)
    }
}

impl std::fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.entity, self.target)
    }
}

/// Server-assigned subscription number. Scoped to one connection lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionHandle(pub u64);

impl std::fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connection state machine.
///
/// ```text
/// Initializing ──connect──▶ Connecting ──handshake ok──▶ Connected
///                              ▲   │                         │
///                              │   └──handshake failed──┐    │ close / error / disconnect
///                              │                        ▼    ▼
///                              └──────connect────── Disconnected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    Initializing,
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectionStatus {
    /// Whether a `connect()` call should open the transport from this state.
    pub fn can_connect(&self) -> bool {
        matches!(self, Self::Initializing | Self::Disconnected)
    }

    /// Whether `next` is a legal transition from `self`.
    pub fn can_transition_to(&self, next: ConnectionStatus) -> bool {
        use ConnectionStatus::*;
        matches!(
            (self, next),
            (Initializing, Connecting)
                | (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
                | (Initializing, Disconnected)
        )
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initializing => write!(f, "initializing"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}
