//! # Time Module
//!
//! Clocks and timer management for deferred notification delivery.
//!
//! ## Concepts
//!
//! - **Clock**: Source of monotonic milliseconds. The bus never reads the
//!   system time directly, so tests can drive it with a [`ManualClock`].
//! - **Timer**: Deadline registered by the batcher; fired by polling
//!   [`TimerService::poll_timers`] with the current clock reading.
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use attrspace::time::{Clock, ManualClock, TimerService};
//!
//! let clock = ManualClock::new();
//! let mut service = TimerService::new();
//!
//! let id = service.register_timer(clock.now_ms() + 50);
//! assert!(service.poll_timers(clock.now_ms()).is_empty());
//!
//! clock.advance(Duration::from_millis(50));
//! let fired = service.poll_timers(clock.now_ms());
//! assert_eq!(fired[0].id, id);
//! ```

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};

use fxhash::FxHashSet;
use smallvec::SmallVec;

/// Collection type for fired timers.
///
/// Uses `SmallVec` to avoid heap allocation when few timers fire per poll.
pub type FiredTimersVec = SmallVec<[TimerRegistration; 8]>;

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Monotonic millisecond clock.
///
/// Readings are relative to an arbitrary origin and only meaningful when
/// compared with other readings from the same clock.
pub trait Clock: Send + Sync {
    /// Returns the current time in milliseconds since the clock's origin.
    fn now_ms(&self) -> u64;
}

/// Wall-clock backed [`Clock`] using [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Creates a clock whose origin is "now".
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Manually advanced [`Clock`] for deterministic tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Creates a clock reading 0.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Creates a clock reading `ms`.
    #[must_use]
    pub fn starting_at(ms: u64) -> Self {
        Self {
            now: AtomicU64::new(ms),
        }
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let ms = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.now.fetch_add(ms, AtomicOrdering::SeqCst);
    }

    /// Sets the clock to an absolute reading.
    ///
    /// Moving backwards is allowed; timers simply fire later.
    pub fn set(&self, ms: u64) {
        self.now.store(ms, AtomicOrdering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(AtomicOrdering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// TimerService
// ---------------------------------------------------------------------------

/// A timer registration for delayed processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerRegistration {
    /// Unique timer ID
    pub id: u64,
    /// Clock reading (milliseconds) at which the timer fires
    pub deadline_ms: u64,
}

impl Ord for TimerRegistration {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap behavior (earliest first, then FIFO)
        other
            .deadline_ms
            .cmp(&self.deadline_ms)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for TimerRegistration {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Timer service for scheduling and managing timers.
///
/// Maintains a priority queue of registrations ordered by deadline. Timers
/// with equal deadlines fire in registration order.
///
/// # Example
///
/// ```rust
/// use attrspace::time::TimerService;
///
/// let mut service = TimerService::new();
///
/// let id1 = service.register_timer(100);
/// let id2 = service.register_timer(50);
///
/// let fired = service.poll_timers(75);
/// assert_eq!(fired.len(), 1);
/// assert_eq!(fired[0].id, id2);
/// # let _ = id1;
/// ```
#[derive(Debug)]
pub struct TimerService {
    timers: BinaryHeap<TimerRegistration>,
    next_timer_id: u64,
}

impl TimerService {
    /// Creates a new timer service.
    #[must_use]
    pub fn new() -> Self {
        Self {
            timers: BinaryHeap::new(),
            next_timer_id: 0,
        }
    }

    /// Registers a new timer.
    ///
    /// Returns the unique timer ID that can be used to cancel the timer.
    pub fn register_timer(&mut self, deadline_ms: u64) -> u64 {
        let id = self.next_timer_id;
        self.next_timer_id += 1;

        self.timers.push(TimerRegistration { id, deadline_ms });

        id
    }

    /// Polls for timers whose deadline is at or before `now_ms`.
    ///
    /// Returns all due timers, earliest first.
    pub fn poll_timers(&mut self, now_ms: u64) -> FiredTimersVec {
        let mut fired = FiredTimersVec::new();

        while self
            .timers
            .peek()
            .is_some_and(|timer| timer.deadline_ms <= now_ms)
        {
            if let Some(timer) = self.timers.pop() {
                fired.push(timer);
            }
        }

        fired
    }

    /// Cancels a timer by ID.
    ///
    /// Returns `true` if the timer was found and cancelled.
    pub fn cancel_timer(&mut self, id: u64) -> bool {
        let count_before = self.timers.len();
        self.timers.retain(|t| t.id != id);
        self.timers.len() < count_before
    }

    /// Cancels every timer whose ID is in `ids` in one pass over the queue.
    ///
    /// Returns the number of timers cancelled.
    pub fn cancel_timers(&mut self, ids: &FxHashSet<u64>) -> usize {
        if ids.is_empty() {
            return 0;
        }
        let count_before = self.timers.len();
        self.timers.retain(|t| !ids.contains(&t.id));
        count_before - self.timers.len()
    }

    /// Returns the number of pending timers.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.timers.len()
    }

    /// Returns the deadline of the next timer to fire, if any.
    #[must_use]
    pub fn next_deadline(&self) -> Option<u64> {
        self.timers.peek().map(|t| t.deadline_ms)
    }

    /// Clears all pending timers.
    pub fn clear(&mut self) {
        self.timers.clear();
    }
}

impl Default for TimerService {
    fn default() -> Self {
        Self::new()
    }
}
