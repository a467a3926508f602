//! Per-key notification batching.
//!
//! Merges rapid matching changes into one deferred delivery per
//! [`BatchKey`] (subscription + entity id + attribute name, falling back to
//! the relation type for relation events without one).
//!
//! # Window Semantics
//!
//! - The first event for a key opens an entry (`batch_count = 1`) and
//!   registers a timer at `now + delay`.
//! - Further events for the same key replace the stored event (most recent
//!   value wins) and bump `batch_count`. The deadline is **not** extended,
//!   so worst-case latency stays bounded under sustained churn.
//! - Expired entries are handed back by [`NotificationBatcher::flush_expired`]
//!   in deadline order and removed.
//!
//! The batcher never invokes callbacks itself; the dispatcher does, after
//! releasing the batcher lock.

use std::fmt;
use std::time::Duration;

use fxhash::{FxHashMap, FxHashSet};

use crate::subscription::event::ChangeEvent;
use crate::subscription::registry::SubscriptionId;
use crate::time::TimerService;

// ---------------------------------------------------------------------------
// BatchKey
// ---------------------------------------------------------------------------

/// Coalescing key. Events with equal keys merge; different keys never do.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchKey {
    /// Owning subscription.
    pub subscription_id: SubscriptionId,
    /// Entity id, or empty when the event has none (relations).
    pub entity_id: String,
    /// Attribute name, or the relation type for relation events without one.
    pub discriminator: String,
}

impl BatchKey {
    /// Derives the key of `event` for `subscription_id`.
    #[must_use]
    pub fn for_event(subscription_id: SubscriptionId, event: &ChangeEvent) -> Self {
        Self {
            subscription_id,
            entity_id: event.entity_id().unwrap_or_default().to_string(),
            discriminator: event.discriminator().to_string(),
        }
    }
}

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.subscription_id, self.entity_id, self.discriminator
        )
    }
}

// ---------------------------------------------------------------------------
// BatchEntry
// ---------------------------------------------------------------------------

/// Pending batch for one key.
#[derive(Debug, Clone)]
pub struct BatchEntry {
    /// Most recent matching event.
    pub latest: ChangeEvent,
    /// Number of events merged so far.
    pub batch_count: u32,
    /// Timer registered for this entry.
    pub timer_id: u64,
    /// Clock reading at which the entry fires.
    pub deadline_ms: u64,
}

/// Result of [`NotificationBatcher::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// A new entry was opened.
    Scheduled {
        /// When the entry will fire.
        deadline_ms: u64,
    },
    /// The event was merged into an existing entry.
    Merged {
        /// Events merged so far, including this one.
        batch_count: u32,
    },
}

// ---------------------------------------------------------------------------
// NotificationBatcher
// ---------------------------------------------------------------------------

/// Fixed-window debounce buffers keyed by [`BatchKey`].
pub struct NotificationBatcher {
    /// Pending entries by key.
    entries: FxHashMap<BatchKey, BatchEntry>,
    /// Timer ID to key, for resolving fired timers.
    timer_keys: FxHashMap<u64, BatchKey>,
    /// Deadlines.
    timers: TimerService,
    /// Window length.
    delay: Duration,
}

impl NotificationBatcher {
    /// Creates a batcher with the given window length.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            entries: FxHashMap::default(),
            timer_keys: FxHashMap::default(),
            timers: TimerService::new(),
            delay,
        }
    }

    /// Adds a matching event at clock reading `now_ms`.
    pub fn add(&mut self, key: BatchKey, event: ChangeEvent, now_ms: u64) -> BatchOutcome {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.latest = event;
            entry.batch_count = entry.batch_count.saturating_add(1);
            return BatchOutcome::Merged {
                batch_count: entry.batch_count,
            };
        }

        let delay_ms = u64::try_from(self.delay.as_millis()).unwrap_or(u64::MAX);
        let deadline_ms = now_ms.saturating_add(delay_ms);
        let timer_id = self.timers.register_timer(deadline_ms);
        self.timer_keys.insert(timer_id, key.clone());
        self.entries.insert(
            key,
            BatchEntry {
                latest: event,
                batch_count: 1,
                timer_id,
                deadline_ms,
            },
        );
        BatchOutcome::Scheduled { deadline_ms }
    }

    /// Removes and returns entries whose deadline is at or before `now_ms`,
    /// earliest first.
    pub fn flush_expired(&mut self, now_ms: u64) -> Vec<(BatchKey, BatchEntry)> {
        let fired = self.timers.poll_timers(now_ms);
        let mut results = Vec::with_capacity(fired.len());

        for timer in fired {
            let Some(key) = self.timer_keys.remove(&timer.id) else {
                continue;
            };
            if let Some(entry) = self.entries.remove(&key) {
                results.push((key, entry));
            }
        }

        results
    }

    /// Removes and returns every pending entry regardless of deadline,
    /// earliest first.
    pub fn flush_all(&mut self) -> Vec<(BatchKey, BatchEntry)> {
        self.timers.clear();
        self.timer_keys.clear();

        let mut results: Vec<_> = self.entries.drain().collect();
        results.sort_by_key(|(_, entry)| (entry.deadline_ms, entry.timer_id));
        results
    }

    /// Drops all entries owned by `subscription_id` without delivering them.
    ///
    /// Returns the number of entries cancelled.
    pub fn cancel_subscription(&mut self, subscription_id: SubscriptionId) -> usize {
        let mut doomed_timers = FxHashSet::default();
        self.entries.retain(|key, entry| {
            if key.subscription_id == subscription_id {
                doomed_timers.insert(entry.timer_id);
                false
            } else {
                true
            }
        });

        for timer_id in &doomed_timers {
            self.timer_keys.remove(timer_id);
        }
        self.timers.cancel_timers(&doomed_timers);

        doomed_timers.len()
    }

    /// Drops every entry without delivering it. Returns how many were
    /// dropped.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.timer_keys.clear();
        self.timers.clear();
        count
    }

    /// Returns the number of pending entries.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.entries.len()
    }

    /// Returns the earliest pending deadline.
    #[must_use]
    pub fn next_deadline_ms(&self) -> Option<u64> {
        self.timers.next_deadline()
    }

    /// Returns the pending entry for `key`.
    #[must_use]
    pub fn get(&self, key: &BatchKey) -> Option<&BatchEntry> {
        self.entries.get(key)
    }

    /// Returns the window length.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl fmt::Debug for NotificationBatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationBatcher")
            .field("pending", &self.entries.len())
            .field("delay", &self.delay)
            .finish()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
