//! Scoped subscription handle.
//!
//! [`SubscriptionHandle`] ties a subscription's lifetime to a value owned by
//! the subscriber, typically a UI component. Dropping the handle
//! unsubscribes, which also cancels any pending batch for it.
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use attrspace::{AttributeSpace, PatternSpec};
//!
//! let space = Arc::new(AttributeSpace::default());
//! {
//!     let _handle = space.subscribe_scoped(PatternSpec::new().entity_type("Cliente"), |_| {})?;
//!     assert_eq!(space.subscription_count(), 1);
//! }
//! assert_eq!(space.subscription_count(), 0);
//! # Ok::<(), attrspace::Error>(())
//! ```
//!
//! The handle holds only a [`Weak`] reference, so it never keeps the bus
//! alive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::subscription::dispatcher::AttributeSpace;
use crate::subscription::event::Notification;
use crate::subscription::filter::PatternSpec;
use crate::subscription::registry::{SubscriptionId, SubscriptionInfo};
use crate::Result;

// ---------------------------------------------------------------------------
// SubscriptionHandle
// ---------------------------------------------------------------------------

/// Owned subscription that unsubscribes on drop.
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    space: Weak<AttributeSpace>,
    cancelled: AtomicBool,
}

impl SubscriptionHandle {
    /// Returns the subscription ID.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Unsubscribes now.
    ///
    /// Returns `true` if this call removed the subscription. Later calls,
    /// and calls after the bus has gone away, return `false`.
    pub fn cancel(&self) -> bool {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.space
            .upgrade()
            .is_some_and(|space| space.unsubscribe(self.id))
    }

    /// Returns `true` once the handle has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Returns a snapshot of the subscription, or `None` once it is gone.
    #[must_use]
    pub fn info(&self) -> Option<SubscriptionInfo> {
        if self.is_cancelled() {
            return None;
        }
        self.space.upgrade()?.subscription_info(self.id)
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl AttributeSpace {
    /// Subscribes a closure and returns a handle that unsubscribes on drop.
    ///
    /// # Errors
    ///
    /// Same as [`subscribe`](Self::subscribe).
    pub fn subscribe_scoped<F>(
        self: &Arc<Self>,
        pattern: PatternSpec,
        callback: F,
    ) -> Result<SubscriptionHandle>
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let id = self.subscribe(pattern, callback)?;
        Ok(SubscriptionHandle {
            id,
            space: Arc::downgrade(self),
            cancelled: AtomicBool::new(false),
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================
