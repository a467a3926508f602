//! Subscription Registry: ownership of subscription records.
//!
//! Records live behind `Arc` so the dispatcher can take a cheap
//! copy-on-iterate snapshot and release the lock before running any
//! callback. A callback that subscribes or unsubscribes mid-dispatch only
//! affects the next snapshot; the `active` flag on each record makes an
//! unsubscribe visible to an in-flight snapshot immediately.
//!
//! # Ordering
//!
//! Ids are assigned from a monotonically increasing counter and records are
//! kept in a `BTreeMap`, so iteration order is registration order.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::subscription::callback::ChangeCallback;
use crate::subscription::filter::CompiledPattern;

// ---------------------------------------------------------------------------
// SubscriptionId
// ---------------------------------------------------------------------------

/// Unique subscription identifier.
///
/// Monotonically assigned by [`SubscriptionRegistry`]; never reused for the
/// lifetime of the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// SubscriptionEntry
// ---------------------------------------------------------------------------

/// A registered subscription.
pub struct SubscriptionEntry {
    id: SubscriptionId,
    pattern: CompiledPattern,
    callback: Arc<dyn ChangeCallback>,
    created_at_ms: u64,
    match_count: AtomicU64,
    active: AtomicBool,
    legacy: bool,
}

impl SubscriptionEntry {
    /// Returns the subscription id.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Returns the compiled pattern.
    #[must_use]
    pub fn pattern(&self) -> &CompiledPattern {
        &self.pattern
    }

    /// Returns the callback.
    #[must_use]
    pub fn callback(&self) -> &Arc<dyn ChangeCallback> {
        &self.callback
    }

    /// Bus clock reading at registration.
    #[must_use]
    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    /// Number of events this subscription's pattern has matched.
    #[must_use]
    pub fn match_count(&self) -> u64 {
        self.match_count.load(Ordering::Relaxed)
    }

    /// Returns `false` once the subscription has been removed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Returns `true` for catch-all subscriptions made via the legacy API.
    #[must_use]
    pub fn is_legacy(&self) -> bool {
        self.legacy
    }

    /// Records one pattern match.
    pub fn record_match(&self) {
        self.match_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns an owned introspection snapshot.
    #[must_use]
    pub fn info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            id: self.id,
            pattern_summary: if self.legacy {
                "*".to_string()
            } else {
                self.pattern.summary()
            },
            created_at_ms: self.created_at_ms,
            match_count: self.match_count(),
        }
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

impl fmt::Debug for SubscriptionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionEntry")
            .field("id", &self.id)
            .field("pattern", &self.pattern.summary())
            .field("created_at_ms", &self.created_at_ms)
            .field("match_count", &self.match_count())
            .field("active", &self.is_active())
            .field("legacy", &self.legacy)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// SubscriptionInfo
// ---------------------------------------------------------------------------

/// Point-in-time view of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionInfo {
    /// Subscription ID.
    pub id: SubscriptionId,
    /// Readable pattern description (`*` for legacy subscriptions).
    pub pattern_summary: String,
    /// Bus clock reading at registration (milliseconds).
    pub created_at_ms: u64,
    /// Pattern matches so far.
    pub match_count: u64,
}

// ---------------------------------------------------------------------------
// SubscriptionRegistry
// ---------------------------------------------------------------------------

/// Registry owning all live subscriptions.
///
/// Read operations (`snapshot`, `get`, `infos`) take a read lock; writes
/// (`register`, `remove`, `clear`) take a write lock. No lock is ever held
/// while a callback runs.
pub struct SubscriptionRegistry {
    /// Live subscriptions by ID (registration order).
    subscriptions: RwLock<BTreeMap<SubscriptionId, Arc<SubscriptionEntry>>>,
    /// Next subscription ID (monotonically increasing).
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Stores a new subscription and returns its fresh ID.
    pub fn register(
        &self,
        pattern: CompiledPattern,
        callback: Arc<dyn ChangeCallback>,
        created_at_ms: u64,
        legacy: bool,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = Arc::new(SubscriptionEntry {
            id,
            pattern,
            callback,
            created_at_ms,
            match_count: AtomicU64::new(0),
            active: AtomicBool::new(true),
            legacy,
        });
        self.subscriptions.write().insert(id, entry);
        id
    }

    /// Removes a subscription and marks it inactive.
    ///
    /// Returns the removed record, or `None` if the ID is unknown.
    pub fn remove(&self, id: SubscriptionId) -> Option<Arc<SubscriptionEntry>> {
        let entry = self.subscriptions.write().remove(&id);
        if let Some(entry) = &entry {
            entry.deactivate();
        }
        entry
    }

    /// Removes every subscription. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let drained = std::mem::take(&mut *self.subscriptions.write());
        for entry in drained.values() {
            entry.deactivate();
        }
        drained.len()
    }

    /// Looks up a live subscription.
    #[must_use]
    pub fn get(&self, id: SubscriptionId) -> Option<Arc<SubscriptionEntry>> {
        self.subscriptions.read().get(&id).cloned()
    }

    /// Copy of the current subscriber list, in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<SubscriptionEntry>> {
        self.subscriptions.read().values().cloned().collect()
    }

    /// Owned introspection snapshots, in registration order.
    #[must_use]
    pub fn infos(&self) -> Vec<SubscriptionInfo> {
        self.subscriptions
            .read()
            .values()
            .map(|entry| entry.info())
            .collect()
    }

    /// Returns the number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Returns the number of subscriptions ever registered.
    #[must_use]
    pub fn total_registered(&self) -> u64 {
        self.next_id.load(Ordering::Relaxed) - 1
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("subscriptions", &self.subscription_count())
            .field("total_registered", &self.total_registered())
            .finish()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
