//! Attribute Space: the change-notification bus.
//!
//! [`AttributeSpace`] accepts change events from the data layer and routes
//! each one to every subscriber whose pattern matches:
//!
//! 1. **Admits** the event through the [`LoopGuard`] so re-entrant chains
//!    stay bounded.
//! 2. **Matches** it against a copy-on-iterate snapshot of the
//!    [`SubscriptionRegistry`].
//! 3. **Delivers** it immediately, or **routes** it to the
//!    [`NotificationBatcher`] which merges rapid updates per key.
//! 4. **Flushes** due batches when the host (or a
//!    [`BatchTimerDriver`](super::BatchTimerDriver)) calls
//!    [`AttributeSpace::poll_timers`].
//!
//! # Architecture
//!
//! ```text
//!  data layer                 AttributeSpace                      UI
//! ┌────────────┐   notify   ┌─────────────────┐  immediate   ┌───────────┐
//! │ attribute  │──────────► │ guard ► match   │────────────► │ callback  │
//! │ relation   │            │        │        │              │ callback  │
//! └────────────┘            │        ▼        │  poll_timers │           │
//!                           │     batcher     │────────────► │ callback  │
//!                           └─────────────────┘              └───────────┘
//! ```
//!
//! Callbacks run synchronously on the delivering thread with no lock held,
//! so they may subscribe, unsubscribe or notify again.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::config::AttributeSpaceConfig;
use crate::subscription::batcher::{BatchEntry, BatchKey, BatchOutcome, NotificationBatcher};
use crate::subscription::callback::{self, ChangeCallback, FnCallback};
use crate::subscription::event::{AttributeChange, ChangeEvent, Notification, RelationChange};
use crate::subscription::filter::{CompiledPattern, PatternError, PatternSpec};
use crate::subscription::guard::{Admission, LoopGuard};
use crate::subscription::registry::{
    SubscriptionEntry, SubscriptionId, SubscriptionInfo, SubscriptionRegistry,
};
use crate::time::{Clock, SystemClock};
use crate::{Error, Result};

// ---------------------------------------------------------------------------
// BusMetrics
// ---------------------------------------------------------------------------

/// Atomic counters for monitoring the bus.
#[derive(Debug, Default)]
pub struct BusMetrics {
    /// `notify*` calls accepted while the bus was live.
    pub total_notifications: AtomicU64,
    /// Notifications suppressed by the loop guard.
    pub dropped_notifications: AtomicU64,
    /// Notifications handed to subscriber callbacks.
    pub delivered_notifications: AtomicU64,
    /// Events absorbed into an existing batch entry.
    pub merged_notifications: AtomicU64,
    /// Callback invocations that failed or panicked.
    pub callback_errors: AtomicU64,
}

impl BusMetrics {
    /// Returns total notifications.
    #[must_use]
    pub fn total_notifications(&self) -> u64 {
        self.total_notifications.load(Ordering::Relaxed)
    }

    /// Returns dropped notifications.
    #[must_use]
    pub fn dropped_notifications(&self) -> u64 {
        self.dropped_notifications.load(Ordering::Relaxed)
    }

    /// Returns delivered notifications.
    #[must_use]
    pub fn delivered_notifications(&self) -> u64 {
        self.delivered_notifications.load(Ordering::Relaxed)
    }

    /// Returns merged notifications.
    #[must_use]
    pub fn merged_notifications(&self) -> u64 {
        self.merged_notifications.load(Ordering::Relaxed)
    }

    /// Returns callback errors.
    #[must_use]
    pub fn callback_errors(&self) -> u64 {
        self.callback_errors.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// BusStats
// ---------------------------------------------------------------------------

/// Point-in-time statistics snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusStats {
    /// Live subscriptions.
    pub active_subscriptions: usize,
    /// Subscriptions ever registered.
    pub total_subscriptions: u64,
    /// `notify*` calls accepted while the bus was live.
    pub total_notifications: u64,
    /// Notifications suppressed by the loop guard.
    pub dropped_notifications: u64,
    /// Notifications handed to subscriber callbacks.
    pub delivered_notifications: u64,
    /// Events absorbed into an existing batch entry.
    pub merged_notifications: u64,
    /// Callback invocations that failed or panicked.
    pub callback_errors: u64,
    /// Batch entries waiting for their deadline.
    pub pending_batches: usize,
}

// ---------------------------------------------------------------------------
// AttributeSpace
// ---------------------------------------------------------------------------

/// The change-notification bus.
///
/// Owned explicitly by the application, typically in an `Arc` shared with
/// the data layer, the UI and a [`BatchTimerDriver`](super::BatchTimerDriver).
///
/// # Usage
///
/// ```rust
/// use std::sync::{Arc, Mutex};
/// use attrspace::{AttributeChange, AttributeSpace, AttributeSpaceConfig, PatternSpec};
///
/// let space = AttributeSpace::new(AttributeSpaceConfig::default().with_batching(false))?;
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = Arc::clone(&seen);
///
/// space.subscribe(
///     PatternSpec::new().entity_type("Cliente").attribute_name("email"),
///     move |n| sink.lock().unwrap().push(n.new_value().cloned()),
/// )?;
///
/// space.notify_change(AttributeChange::new("email", "a@b.com").with_entity("Cliente", "c1"));
/// assert_eq!(seen.lock().unwrap().len(), 1);
/// # Ok::<(), attrspace::Error>(())
/// ```
pub struct AttributeSpace {
    /// Configuration.
    config: AttributeSpaceConfig,
    /// Time source for batch deadlines and subscription timestamps.
    clock: Arc<dyn Clock>,
    /// Live subscriptions.
    registry: SubscriptionRegistry,
    /// Pending batches.
    batcher: Mutex<NotificationBatcher>,
    /// Re-entrancy guard.
    guard: LoopGuard,
    /// Metrics.
    metrics: BusMetrics,
    /// Set once by `shutdown`.
    shut_down: AtomicBool,
}

impl AttributeSpace {
    /// Creates a bus on the system clock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the configuration is invalid.
    pub fn new(config: AttributeSpaceConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Creates a bus on a caller-supplied clock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the configuration is invalid.
    pub fn with_clock(config: AttributeSpaceConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, clock))
    }

    fn build(config: AttributeSpaceConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            batcher: Mutex::new(NotificationBatcher::new(config.batch_delay())),
            guard: LoopGuard::new(config.max_loop_detection),
            registry: SubscriptionRegistry::new(),
            metrics: BusMetrics::default(),
            shut_down: AtomicBool::new(false),
            clock,
            config,
        }
    }

    // --- Subscription management ---

    /// Subscribes a closure to events matching `pattern`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidPattern`] if the pattern is empty or its glob does
    ///   not compile.
    /// - [`Error::ShutDown`] after [`shutdown`](Self::shutdown).
    pub fn subscribe<F>(&self, pattern: PatternSpec, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.subscribe_callback(pattern, FnCallback(callback))
    }

    /// Subscribes a [`ChangeCallback`] implementation to events matching
    /// `pattern`.
    ///
    /// # Errors
    ///
    /// Same as [`subscribe`](Self::subscribe).
    pub fn subscribe_callback<C: ChangeCallback>(
        &self,
        pattern: PatternSpec,
        callback: C,
    ) -> Result<SubscriptionId> {
        if pattern.is_empty() {
            return Err(PatternError::Empty.into());
        }
        let compiled = pattern.compile()?;
        self.register(compiled, Arc::new(callback), false)
    }

    /// Subscribes a closure to every event (legacy catch-all API).
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShutDown`] after [`shutdown`](Self::shutdown).
    pub fn subscribe_legacy<F>(&self, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.register(CompiledPattern::match_all(), Arc::new(FnCallback(callback)), true)
    }

    fn register(
        &self,
        pattern: CompiledPattern,
        callback: Arc<dyn ChangeCallback>,
        legacy: bool,
    ) -> Result<SubscriptionId> {
        if self.is_shut_down() {
            return Err(Error::ShutDown);
        }

        let summary = self.config.enable_logging.then(|| pattern.summary());
        let id = self
            .registry
            .register(pattern, callback, self.clock.now_ms(), legacy);

        if let Some(summary) = summary {
            tracing::debug!(subscription_id = %id, pattern = %summary, legacy, "subscribed");
        }
        Ok(id)
    }

    /// Removes a subscription and cancels its pending batches.
    ///
    /// Returns `true` if the subscription existed. Calling it again is a
    /// no-op returning `false`.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        if self.registry.remove(id).is_none() {
            return false;
        }

        let cancelled = self.batcher.lock().cancel_subscription(id);
        if self.config.enable_logging {
            tracing::debug!(subscription_id = %id, cancelled_batches = cancelled, "unsubscribed");
        }
        true
    }

    // --- Notification ---

    /// Publishes an attribute change.
    pub fn notify_change(&self, change: AttributeChange) {
        self.notify(ChangeEvent::Attribute(change));
    }

    /// Publishes a relation change.
    pub fn notify_relation_change(&self, change: RelationChange) {
        self.notify(ChangeEvent::Relation(change));
    }

    /// Validates a JSON payload and publishes it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPayload`] if the payload is not a valid change
    /// event. Nothing is counted or delivered in that case.
    pub fn notify_json(&self, payload: Value) -> Result<()> {
        let event = ChangeEvent::from_json(payload)?;
        self.notify(event);
        Ok(())
    }

    /// Publishes a change event.
    ///
    /// Ignored after [`shutdown`](Self::shutdown). Callback failures are
    /// recorded in [`BusStats::callback_errors`] and never reach the caller.
    pub fn notify(&self, event: ChangeEvent) {
        if self.is_shut_down() {
            return;
        }
        self.metrics
            .total_notifications
            .fetch_add(1, Ordering::Relaxed);

        let scope = self.guard.enter();
        if let Admission::Suppressed { first } = scope.admission() {
            self.metrics
                .dropped_notifications
                .fetch_add(1, Ordering::Relaxed);
            if self.config.enable_logging {
                if first {
                    tracing::warn!(
                        depth = scope.depth(),
                        max_loop_detection = self.guard.max_chain(),
                        kind = %event.kind(),
                        discriminator = event.discriminator(),
                        "notification loop detected, suppressing rest of chain"
                    );
                } else {
                    tracing::debug!(
                        depth = scope.depth(),
                        discriminator = event.discriminator(),
                        "notification suppressed"
                    );
                }
            }
            return;
        }

        let now_ms = self.clock.now_ms();
        for entry in self.registry.snapshot() {
            if !entry.is_active() || !entry.pattern().matches(&event) {
                continue;
            }
            entry.record_match();

            if self.config.enable_batching {
                let key = BatchKey::for_event(entry.id(), &event);
                let outcome = self.batcher.lock().add(key, event.clone(), now_ms);
                if let BatchOutcome::Merged { .. } = outcome {
                    self.metrics
                        .merged_notifications
                        .fetch_add(1, Ordering::Relaxed);
                }
            } else {
                self.deliver(&entry, &Notification::immediate(entry.id(), event.clone()));
            }
        }
    }

    fn deliver(&self, entry: &SubscriptionEntry, notification: &Notification) {
        self.metrics
            .delivered_notifications
            .fetch_add(1, Ordering::Relaxed);

        let callback = &**entry.callback();
        if let Err(error) = callback::invoke(callback, notification) {
            self.metrics.callback_errors.fetch_add(1, Ordering::Relaxed);
            if self.config.enable_logging {
                tracing::warn!(
                    subscription_id = %entry.id(),
                    %error,
                    "subscriber callback failed"
                );
            }
            callback::report_error(callback, &error);
        }
    }

    // --- Batch timers ---

    /// Delivers every batch whose deadline has passed.
    ///
    /// Returns the number of notifications delivered.
    pub fn poll_timers(&self) -> usize {
        if self.is_shut_down() {
            return 0;
        }
        let now_ms = self.clock.now_ms();
        let due = self.batcher.lock().flush_expired(now_ms);
        self.deliver_batches(due)
    }

    /// Delivers every pending batch now, regardless of deadline.
    ///
    /// Returns the number of notifications delivered.
    pub fn flush_all(&self) -> usize {
        if self.is_shut_down() {
            return 0;
        }
        let pending = self.batcher.lock().flush_all();
        self.deliver_batches(pending)
    }

    fn deliver_batches(&self, batches: Vec<(BatchKey, BatchEntry)>) -> usize {
        let mut delivered = 0;
        for (key, batch) in batches {
            // Earlier callbacks in this loop may have unsubscribed this one
            let Some(entry) = self.registry.get(key.subscription_id) else {
                continue;
            };
            if !entry.is_active() {
                continue;
            }

            let notification = Notification {
                subscription_id: key.subscription_id,
                event: batch.latest,
                batch_count: batch.batch_count,
            };
            self.deliver(&entry, &notification);
            delivered += 1;
        }
        delivered
    }

    /// Returns the earliest pending batch deadline, in clock milliseconds.
    #[must_use]
    pub fn next_deadline_ms(&self) -> Option<u64> {
        self.batcher.lock().next_deadline_ms()
    }

    /// Returns the number of pending batch entries.
    #[must_use]
    pub fn pending_batches(&self) -> usize {
        self.batcher.lock().pending_count()
    }

    // --- Introspection ---

    /// Returns a statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> BusStats {
        BusStats {
            active_subscriptions: self.registry.subscription_count(),
            total_subscriptions: self.registry.total_registered(),
            total_notifications: self.metrics.total_notifications(),
            dropped_notifications: self.metrics.dropped_notifications(),
            delivered_notifications: self.metrics.delivered_notifications(),
            merged_notifications: self.metrics.merged_notifications(),
            callback_errors: self.metrics.callback_errors(),
            pending_batches: self.pending_batches(),
        }
    }

    /// Returns snapshots of all live subscriptions, in registration order.
    #[must_use]
    pub fn active_subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.registry.infos()
    }

    /// Returns a snapshot of one live subscription.
    #[must_use]
    pub fn subscription_info(&self, id: SubscriptionId) -> Option<SubscriptionInfo> {
        self.registry.get(id).map(|entry| entry.info())
    }

    /// Returns the number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.registry.subscription_count()
    }

    /// Returns the bus metrics.
    #[must_use]
    pub fn metrics(&self) -> &BusMetrics {
        &self.metrics
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &AttributeSpaceConfig {
        &self.config
    }

    /// Returns the current reading of the bus clock.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    // --- Teardown ---

    /// Tears the bus down.
    ///
    /// Cancels every pending batch without delivering it, removes all
    /// subscriptions and turns later `notify*` calls into no-ops. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let cancelled = self.batcher.lock().clear();
        let removed = self.registry.clear();
        if self.config.enable_logging {
            tracing::info!(
                subscriptions = removed,
                cancelled_batches = cancelled,
                "attribute space shut down"
            );
        }
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has run.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

impl Default for AttributeSpace {
    fn default() -> Self {
        Self::build(AttributeSpaceConfig::default(), Arc::new(SystemClock::new()))
    }
}

impl Drop for AttributeSpace {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for AttributeSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeSpace")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("pending_batches", &self.pending_batches())
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
