//! Loop guard for re-entrant notification chains.
//!
//! A *chain* is the synchronous call tree rooted at an outermost `notify*`
//! call. Callbacks may notify again, which nests deeper into the same chain.
//! Chains are tracked per thread: a notify running concurrently on another
//! thread is a root of its own chain, never a nested call.
//! The guard caps how many notifications one chain may admit so a callback
//! that unconditionally re-notifies cannot recurse forever.
//!
//! # Admission Rule
//!
//! - The root call (depth 1) is always admitted and counts as the first
//!   notification of its chain.
//! - A nested call (depth > 1) is suppressed once
//!   `notifications_in_chain >= max_chain`. The first suppression trips the
//!   chain; every later call in the same chain is suppressed too.
//! - When depth returns to 0 the thread's chain state is discarded.
//!
//! ```rust
//! use attrspace::subscription::LoopGuard;
//!
//! let guard = LoopGuard::new(3);
//! let root = guard.enter();
//! assert!(root.admission().is_admitted());
//! ```

use std::thread::{self, ThreadId};

use fxhash::FxHashMap;
use parking_lot::Mutex;

// ---------------------------------------------------------------------------
// Admission
// ---------------------------------------------------------------------------

/// Decision for one notification entering the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The notification may be dispatched.
    Admitted,
    /// The notification must be dropped.
    Suppressed {
        /// `true` for the suppression that tripped the chain.
        first: bool,
    },
}

impl Admission {
    /// Returns `true` for [`Admission::Admitted`].
    #[must_use]
    pub fn is_admitted(self) -> bool {
        matches!(self, Self::Admitted)
    }

    /// Returns `true` if this suppression tripped the chain.
    #[must_use]
    pub fn is_first_suppression(self) -> bool {
        matches!(self, Self::Suppressed { first: true })
    }
}

// ---------------------------------------------------------------------------
// ChainState
// ---------------------------------------------------------------------------

/// Per-chain bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainState {
    /// Current nesting depth (0 when idle).
    pub depth: u32,
    /// Notifications admitted in the current chain.
    pub notifications_in_chain: u32,
    /// Set once the chain has suppressed a notification.
    pub tripped: bool,
}

// ---------------------------------------------------------------------------
// LoopGuard
// ---------------------------------------------------------------------------

/// Re-entrancy guard shared by one bus, keeping one chain per thread.
#[derive(Debug)]
pub struct LoopGuard {
    max_chain: u32,
    /// Chains in flight; a thread's entry is removed once its depth hits 0.
    chains: Mutex<FxHashMap<ThreadId, ChainState>>,
}

impl LoopGuard {
    /// Creates a guard admitting at most `max_chain` notifications per chain.
    ///
    /// A value of 0 is treated as 1; the root call is never suppressed.
    #[must_use]
    pub fn new(max_chain: u32) -> Self {
        Self {
            max_chain: max_chain.max(1),
            chains: Mutex::new(FxHashMap::default()),
        }
    }

    /// Enters the guard for one notification.
    ///
    /// The returned scope must be held for the whole dispatch; dropping it
    /// leaves the chain level.
    #[must_use = "dropping the scope immediately leaves the chain"]
    pub fn enter(&self) -> ChainScope<'_> {
        let thread = thread::current().id();
        let mut chains = self.chains.lock();
        let state = chains.entry(thread).or_default();
        state.depth += 1;

        let admission = if state.tripped {
            Admission::Suppressed { first: false }
        } else if state.depth > 1 && state.notifications_in_chain >= self.max_chain {
            state.tripped = true;
            Admission::Suppressed { first: true }
        } else {
            state.notifications_in_chain += 1;
            Admission::Admitted
        };

        ChainScope {
            guard: self,
            thread,
            admission,
            depth: state.depth,
        }
    }

    /// Returns the chain budget.
    #[must_use]
    pub fn max_chain(&self) -> u32 {
        self.max_chain
    }

    /// Returns a copy of the calling thread's chain state.
    #[must_use]
    pub fn state(&self) -> ChainState {
        self.chains
            .lock()
            .get(&thread::current().id())
            .copied()
            .unwrap_or_default()
    }

    /// Returns the number of threads with a chain in flight.
    #[must_use]
    pub fn active_chains(&self) -> usize {
        self.chains.lock().len()
    }

    fn leave(&self, thread: ThreadId) {
        let mut chains = self.chains.lock();
        if let Some(state) = chains.get_mut(&thread) {
            state.depth = state.depth.saturating_sub(1);
            if state.depth == 0 {
                chains.remove(&thread);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ChainScope
// ---------------------------------------------------------------------------

/// RAII handle for one level of a notification chain.
///
/// Leaves the level on drop, including during a panic unwind.
#[derive(Debug)]
pub struct ChainScope<'a> {
    guard: &'a LoopGuard,
    thread: ThreadId,
    admission: Admission,
    depth: u32,
}

impl ChainScope<'_> {
    /// Returns the admission decision taken on entry.
    #[must_use]
    pub fn admission(&self) -> Admission {
        self.admission
    }

    /// Returns the nesting depth at entry (1 for the root call).
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.depth
    }
}

impl Drop for ChainScope<'_> {
    fn drop(&mut self) {
        self.guard.leave(self.thread);
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Re-enters unconditionally until suppressed, like a callback that
    /// always notifies again.
    fn recurse(guard: &LoopGuard, admitted: &mut u32, dropped: &mut u32) {
        let scope = guard.enter();
        if scope.admission().is_admitted() {
            *admitted += 1;
            recurse(guard, admitted, dropped);
        } else {
            *dropped += 1;
        }
    }

    // --- Admission tests ---

    #[test]
    fn test_default_budget_admits_three_drops_one() {
        let guard = LoopGuard::new(3);
        let (mut admitted, mut dropped) = (0, 0);
        recurse(&guard, &mut admitted, &mut dropped);

        assert_eq!(admitted, 3);
        assert_eq!(dropped, 1);
        assert_eq!(guard.state(), ChainState::default());
    }

    #[test]
    fn test_budget_of_one_admits_root_only() {
        let guard = LoopGuard::new(1);
        let (mut admitted, mut dropped) = (0, 0);
        recurse(&guard, &mut admitted, &mut dropped);

        assert_eq!(admitted, 1);
        assert_eq!(dropped, 1);
    }

    #[test]
    fn test_zero_budget_clamped() {
        let guard = LoopGuard::new(0);
        assert_eq!(guard.max_chain(), 1);
        assert!(guard.enter().admission().is_admitted());
    }

    #[test]
    fn test_sequential_roots_independent() {
        let guard = LoopGuard::new(2);
        for _ in 0..10 {
            let scope = guard.enter();
            assert_eq!(scope.depth(), 1);
            assert!(scope.admission().is_admitted());
        }
    }

    // --- Chain state tests ---

    #[test]
    fn test_trip_persists_for_siblings() {
        let guard = LoopGuard::new(2);
        let root = guard.enter();
        assert!(root.admission().is_admitted());

        {
            let child = guard.enter();
            assert!(child.admission().is_admitted());
        }
        {
            let child = guard.enter();
            assert!(child.admission().is_first_suppression());
        }
        {
            let child = guard.enter();
            assert_eq!(child.admission(), Admission::Suppressed { first: false });
        }

        let state = guard.state();
        assert_eq!(state.depth, 1);
        assert_eq!(state.notifications_in_chain, 2);
        assert!(state.tripped);

        drop(root);
        assert_eq!(guard.state(), ChainState::default());
        assert!(guard.enter().admission().is_admitted());
    }

    #[test]
    fn test_scope_released_on_unwind() {
        let guard = LoopGuard::new(3);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _scope = guard.enter();
            panic!("callback blew up");
        }));
        assert!(result.is_err());
        assert_eq!(guard.state().depth, 0);
        assert_eq!(guard.active_chains(), 0);
    }

    // --- Threading tests ---

    #[test]
    fn test_other_thread_starts_own_chain() {
        let guard = LoopGuard::new(1);
        let root = guard.enter();
        assert!(root.admission().is_admitted());

        std::thread::scope(|s| {
            s.spawn(|| {
                let scope = guard.enter();
                assert_eq!(scope.depth(), 1);
                assert!(scope.admission().is_admitted());
                assert_eq!(guard.active_chains(), 2);
            });
        });

        // The spawned chain left no trace on this thread's chain
        assert_eq!(guard.state().depth, 1);
        assert_eq!(guard.state().notifications_in_chain, 1);
        assert!(!guard.state().tripped);
        drop(root);
        assert_eq!(guard.active_chains(), 0);
    }
}
