//! Subscription registry.
//!
//! Tracks the set of *desired* logical subscriptions and the mapping from
//! server-assigned handles back to them. Desired subscriptions outlive any one
//! connection; handles do not, and are dropped wholesale on disconnect so the
//! next connection can replay every key.

use std::collections::HashMap;

use crate::types::{Entity, SubscriptionHandle, SubscriptionKey};

/// Registry of logical subscriptions and their current handles.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    /// Desired keys, in registration order.
    keys: Vec<SubscriptionKey>,
    by_key: HashMap<SubscriptionKey, SubscriptionHandle>,
    by_handle: HashMap<SubscriptionHandle, SubscriptionKey>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `(entity, target)` if absent.
    ///
    /// Returns `true` when the key was newly added, `false` when it was
    /// already present (in which case nothing changes).
    pub fn ensure(&mut self, entity: Entity, target: &str) -> bool {
        let key = SubscriptionKey::new(entity, target);
        if self.contains(&key) {
            return false;
        }
        self.keys.push(key);
        true
    }

    /// Record the handle acknowledged for `key`, replacing any stale one.
    ///
    /// Returns `false` (and records nothing) if `key` is not registered.
    pub fn bind(&mut self, key: &SubscriptionKey, handle: SubscriptionHandle) -> bool {
        if !self.contains(key) {
            return false;
        }
        if let Some(stale) = self.by_key.insert(key.clone(), handle) {
            self.by_handle.remove(&stale);
        }
        // A handle number reused by the server must not keep pointing at an
        // older key.
        if let Some(previous) = self.by_handle.insert(handle, key.clone()) {
            if &previous != key {
                self.by_key.remove(&previous);
            }
        }
        true
    }

    /// Map a notification's handle back to its logical key.
    pub fn resolve(&self, handle: SubscriptionHandle) -> Option<&SubscriptionKey> {
        self.by_handle.get(&handle)
    }

    /// The handle currently bound to `key`, if any.
    pub fn handle_of(&self, key: &SubscriptionKey) -> Option<SubscriptionHandle> {
        self.by_key.get(key).copied()
    }

    /// All desired keys in registration order, for reconnect replay.
    pub fn all(&self) -> Vec<SubscriptionKey> {
        self.keys.clone()
    }

    /// Every key that currently has a live handle, in registration order.
    pub fn bound(&self) -> Vec<(SubscriptionKey, SubscriptionHandle)> {
        self.keys
            .iter()
            .filter_map(|k| self.by_key.get(k).map(|h| (k.clone(), *h)))
            .collect()
    }

    /// Remove `key` and its handle. Returns the handle that was bound, if any.
    pub fn forget(&mut self, key: &SubscriptionKey) -> Option<SubscriptionHandle> {
        self.keys.retain(|k| k != key);
        let handle = self.by_key.remove(key);
        if let Some(h) = handle {
            self.by_handle.remove(&h);
        }
        handle
    }

    /// Drop every handle while keeping the desired keys.
    pub fn invalidate_handles(&mut self) {
        self.by_key.clear();
        self.by_handle.clear();
    }

    pub fn contains(&self, key: &SubscriptionKey) -> bool {
        self.keys.iter().any(|k| k == key)
    }

    /// Number of desired subscriptions.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` if no subscriptions are desired.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_is_idempotent() {
        let mut reg = SubscriptionRegistry::new();
        assert!(reg.ensure(Entity::Account, "Acct1"));
        assert!(!reg.ensure(Entity::Account, "Acct1"));
        assert!(reg.ensure(Entity::Signature, "Acct1"));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn bind_and_resolve() {
        let mut reg = SubscriptionRegistry::new();
        reg.ensure(Entity::Account, "Acct1");
        let key = SubscriptionKey::account("Acct1");
        assert!(reg.bind(&key, SubscriptionHandle(42)));
        assert_eq!(reg.resolve(SubscriptionHandle(42)), Some(&key));
        assert_eq!(reg.handle_of(&key), Some(SubscriptionHandle(42)));
    }

    #[test]
    fn bind_unknown_key_is_rejected() {
        let mut reg = SubscriptionRegistry::new();
        assert!(!reg.bind(&SubscriptionKey::account("nope"), SubscriptionHandle(1)));
        assert!(reg.resolve(SubscriptionHandle(1)).is_none());
    }

    #[test]
    fn rebind_replaces_stale_handle() {
        let mut reg = SubscriptionRegistry::new();
        reg.ensure(Entity::Account, "Acct1");
        let key = SubscriptionKey::account("Acct1");
        reg.bind(&key, SubscriptionHandle(1));
        reg.bind(&key, SubscriptionHandle(2));
        assert!(reg.resolve(SubscriptionHandle(1)).is_none());
        assert_eq!(reg.resolve(SubscriptionHandle(2)), Some(&key));
    }

    #[test]
    fn reused_handle_moves_to_new_key() {
        let mut reg = SubscriptionRegistry::new();
        reg.ensure(Entity::Account, "A");
        reg.ensure(Entity::Account, "B");
        let a = SubscriptionKey::account("A");
        let b = SubscriptionKey::account("B");
        reg.bind(&a, SubscriptionHandle(7));
        reg.bind(&b, SubscriptionHandle(7));
        assert_eq!(reg.resolve(SubscriptionHandle(7)), Some(&b));
        assert_eq!(reg.handle_of(&a), None);
    }

    #[test]
    fn all_preserves_registration_order() {
        let mut reg = SubscriptionRegistry::new();
        reg.ensure(Entity::Account, "C");
        reg.ensure(Entity::Signature, "A");
        reg.ensure(Entity::Account, "B");
        let targets: Vec<_> = reg.all().into_iter().map(|k| k.target).collect();
        assert_eq!(targets, vec!["C", "A", "B"]);
    }

    #[test]
    fn invalidate_keeps_keys_drops_handles() {
        let mut reg = SubscriptionRegistry::new();
        reg.ensure(Entity::Account, "Acct1");
        let key = SubscriptionKey::account("Acct1");
        reg.bind(&key, SubscriptionHandle(42));
        reg.invalidate_handles();
        assert!(reg.resolve(SubscriptionHandle(42)).is_none());
        assert!(reg.bound().is_empty());
        assert_eq!(reg.all(), vec![key]);
    }

    #[test]
    fn forget_removes_key_and_handle() {
        let mut reg = SubscriptionRegistry::new();
        reg.ensure(Entity::Account, "Acct1");
        let key = SubscriptionKey::account("Acct1");
        reg.bind(&key, SubscriptionHandle(42));
        assert_eq!(reg.forget(&key), Some(SubscriptionHandle(42)));
        assert!(reg.is_empty());
        assert!(reg.resolve(SubscriptionHandle(42)).is_none());
        assert_eq!(reg.forget(&key), None);
    }
}
