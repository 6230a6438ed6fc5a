//! Subscription Cache
//!
//! The core's own record of which characteristics currently have an
//! active notify/indicate subscription. Incoming value updates are
//! filtered against it, and device-info reporting reads it for live
//! property status.

use crate::ble::radio::CharacteristicId;

/// Kind of subscription a characteristic holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    Notify,
    Indicate,
}

impl SubscriptionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionKind::Notify => "NOTIFY",
            SubscriptionKind::Indicate => "INDICATE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SubscriptionEntry {
    id: CharacteristicId,
    kind: SubscriptionKind,
}

/// Set of active (characteristic, kind) subscriptions.
///
/// Invariant: at most one entry per characteristic; inserting an entry
/// removes any pre-existing entry for the same characteristic under a
/// different kind first. Cleared on disconnect.
#[derive(Debug, Default)]
pub struct SubscriptionCache {
    entries: Vec<SubscriptionEntry>,
}

impl SubscriptionCache {
    pub fn insert(&mut self, id: &CharacteristicId, kind: SubscriptionKind) {
        self.entries.retain(|e| e.id != *id);
        self.entries.push(SubscriptionEntry { id: *id, kind });
    }

    pub fn remove(&mut self, id: &CharacteristicId, kind: SubscriptionKind) {
        self.entries.retain(|e| !(e.id == *id && e.kind == kind));
    }

    pub fn contains(&self, id: &CharacteristicId, kind: SubscriptionKind) -> bool {
        self.entries.iter().any(|e| e.id == *id && e.kind == kind)
    }

    /// Whether the characteristic holds any active subscription; value
    /// updates from unsubscribed characteristics never reach the
    /// response buffer.
    pub fn is_subscribed(&self, id: &CharacteristicId) -> bool {
        self.entries.iter().any(|e| e.id == *id)
    }

    /// Record caller intent ahead of the platform call.
    pub fn apply(&mut self, id: &CharacteristicId, kind: SubscriptionKind, active: bool) {
        if active {
            self.insert(id, kind);
        } else {
            self.remove(id, kind);
        }
    }

    /// Correct the cache against the platform-reported subscription
    /// state after a subscribe/unsubscribe acknowledgment, so a failed
    /// or partial platform-level change cannot leave it permanently
    /// wrong.
    pub fn reconcile(&mut self, id: &CharacteristicId, kind: SubscriptionKind, reported_active: bool) {
        let cached = self.contains(id, kind);
        if reported_active && !cached {
            self.insert(id, kind);
        } else if !reported_active && cached {
            self.remove(id, kind);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn char_id(n: u128) -> CharacteristicId {
        CharacteristicId::new(Uuid::from_u128(0x1000), Uuid::from_u128(n))
    }

    #[test]
    fn test_insert_replaces_other_kind() {
        let mut cache = SubscriptionCache::default();
        let id = char_id(1);
        cache.insert(&id, SubscriptionKind::Notify);
        cache.insert(&id, SubscriptionKind::Indicate);
        assert!(!cache.contains(&id, SubscriptionKind::Notify));
        assert!(cache.contains(&id, SubscriptionKind::Indicate));
    }

    #[test]
    fn test_is_subscribed_any_kind() {
        let mut cache = SubscriptionCache::default();
        let id = char_id(2);
        assert!(!cache.is_subscribed(&id));
        cache.insert(&id, SubscriptionKind::Notify);
        assert!(cache.is_subscribed(&id));
        assert!(!cache.is_subscribed(&char_id(3)));
    }

    #[test]
    fn test_reconcile_adds_missing_entry() {
        let mut cache = SubscriptionCache::default();
        let id = char_id(4);
        cache.reconcile(&id, SubscriptionKind::Notify, true);
        assert!(cache.contains(&id, SubscriptionKind::Notify));
    }

    #[test]
    fn test_reconcile_removes_stale_entry() {
        let mut cache = SubscriptionCache::default();
        let id = char_id(5);
        cache.apply(&id, SubscriptionKind::Notify, true);
        // Platform reports the subscribe did not stick.
        cache.reconcile(&id, SubscriptionKind::Notify, false);
        assert!(!cache.is_subscribed(&id));
    }

    #[test]
    fn test_reconcile_noop_when_consistent() {
        let mut cache = SubscriptionCache::default();
        let id = char_id(6);
        cache.insert(&id, SubscriptionKind::Indicate);
        cache.reconcile(&id, SubscriptionKind::Indicate, true);
        assert!(cache.contains(&id, SubscriptionKind::Indicate));
    }

    #[test]
    fn test_clear() {
        let mut cache = SubscriptionCache::default();
        cache.insert(&char_id(7), SubscriptionKind::Notify);
        cache.insert(&char_id(8), SubscriptionKind::Indicate);
        cache.clear();
        assert!(!cache.is_subscribed(&char_id(7)));
        assert!(!cache.is_subscribed(&char_id(8)));
    }
}
