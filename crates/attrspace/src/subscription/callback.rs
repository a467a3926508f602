//! Subscriber callbacks: [`ChangeCallback`] trait and panic-isolated
//! invocation.
//!
//! # API Styles
//!
//! - **Trait-based**: Implement [`ChangeCallback`] to return errors from
//!   `on_change` and observe them in `on_error`.
//! - **Closure-based**: `AttributeSpace::subscribe` wraps any
//!   `Fn(&Notification)` in an internal adapter.
//!
//! # Failure Isolation
//!
//! A callback that returns `Err` or panics is reported as a
//! [`CallbackError`]. Panics are caught with [`std::panic::catch_unwind`];
//! the dispatcher records the failure and moves on to the next subscriber.
//! Failures are never surfaced to whoever called `notify_change`.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use crate::subscription::event::Notification;

// ---------------------------------------------------------------------------
// CallbackError
// ---------------------------------------------------------------------------

/// Failure of a single subscriber callback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallbackError {
    /// The callback reported an error.
    #[error("callback failed: {0}")]
    Failed(String),
    /// The callback panicked.
    #[error("callback panicked: {0}")]
    Panicked(String),
}

impl CallbackError {
    /// Convenience constructor for [`CallbackError::Failed`].
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

// ---------------------------------------------------------------------------
// ChangeCallback
// ---------------------------------------------------------------------------

/// Callback trait for bus subscriptions.
///
/// Invoked synchronously on the thread that delivers the notification:
/// the `notify_*` caller for immediate delivery, the `poll_timers` caller
/// for batched delivery. Implementations may call back into the bus.
///
/// # Example
///
/// ```rust,ignore
/// struct Rerender;
///
/// impl ChangeCallback for Rerender {
///     fn on_change(&self, n: &Notification) -> Result<(), CallbackError> {
///         redraw(n.event.entity_id()).map_err(|e| CallbackError::failed(e.to_string()))
///     }
/// }
/// ```
pub trait ChangeCallback: Send + Sync + 'static {
    /// Called for each delivered notification.
    ///
    /// # Errors
    ///
    /// An error is recorded by the bus and handed to
    /// [`on_error`](Self::on_error); delivery to other subscribers continues.
    fn on_change(&self, notification: &Notification) -> Result<(), CallbackError>;

    /// Called after `on_change` failed or panicked.
    ///
    /// Default implementation is a no-op; the bus already logs the failure.
    fn on_error(&self, _error: &CallbackError) {}
}

// ---------------------------------------------------------------------------
// FnCallback (private adapter)
// ---------------------------------------------------------------------------

/// Adapter that wraps a closure into a [`ChangeCallback`].
pub(crate) struct FnCallback<F>(pub(crate) F);

impl<F: Fn(&Notification) + Send + Sync + 'static> ChangeCallback for FnCallback<F> {
    fn on_change(&self, notification: &Notification) -> Result<(), CallbackError> {
        (self.0)(notification);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------------

/// Calls `callback.on_change`, converting a panic into
/// [`CallbackError::Panicked`].
pub(crate) fn invoke(
    callback: &dyn ChangeCallback,
    notification: &Notification,
) -> Result<(), CallbackError> {
    match std::panic::catch_unwind(AssertUnwindSafe(|| callback.on_change(notification))) {
        Ok(result) => result,
        Err(panic) => Err(CallbackError::Panicked(panic_message(panic.as_ref()))),
    }
}

/// Hands `error` to `callback.on_error`. A panic inside `on_error` is
/// swallowed.
pub(crate) fn report_error(callback: &dyn ChangeCallback, error: &CallbackError) {
    let _ = std::panic::catch_unwind(AssertUnwindSafe(|| callback.on_error(error)));
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use crate::subscription::event::{AttributeChange, Notification};
    use crate::subscription::registry::SubscriptionId;

    fn notification() -> Notification {
        Notification::immediate(SubscriptionId(1), AttributeChange::new("email", "x").into())
    }

    #[test]
    fn test_fn_callback_invoked() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let cb = FnCallback(move |n: &Notification| {
            seen_clone.lock().unwrap().push(n.batch_count);
        });

        assert!(invoke(&cb, &notification()).is_ok());
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[test]
    fn test_error_returned() {
        struct Failing;
        impl ChangeCallback for Failing {
            fn on_change(&self, _n: &Notification) -> Result<(), CallbackError> {
                Err(CallbackError::failed("render failed"))
            }
        }

        let err = invoke(&Failing, &notification()).unwrap_err();
        assert_eq!(err, CallbackError::Failed("render failed".into()));
        assert_eq!(err.to_string(), "callback failed: render failed");
    }

    #[test]
    fn test_panic_caught_str() {
        let cb = FnCallback(|_n: &Notification| panic!("deliberate test panic"));
        let err = invoke(&cb, &notification()).unwrap_err();
        assert_eq!(err, CallbackError::Panicked("deliberate test panic".into()));
    }

    #[test]
    fn test_report_error_reaches_on_error() {
        struct Recorder(Mutex<Vec<CallbackError>>);
        impl ChangeCallback for Recorder {
            fn on_change(&self, _n: &Notification) -> Result<(), CallbackError> {
                Ok(())
            }
            fn on_error(&self, error: &CallbackError) {
                self.0.lock().unwrap().push(error.clone());
            }
        }

        let recorder = Recorder(Mutex::new(Vec::new()));
        report_error(&recorder, &CallbackError::failed("x"));
        assert_eq!(recorder.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_report_error_swallows_panic() {
        struct Exploding;
        impl ChangeCallback for Exploding {
            fn on_change(&self, _n: &Notification) -> Result<(), CallbackError> {
                Ok(())
            }
            fn on_error(&self, _error: &CallbackError) {
                panic!("on_error exploded");
            }
        }

        report_error(&Exploding, &CallbackError::failed("x"));
    }

    #[test]
    fn test_panic_caught_string() {
        let cb = FnCallback(|n: &Notification| panic!("bad batch {}", n.batch_count));
        let err = invoke(&cb, &notification()).unwrap_err();
        assert!(err.to_string().contains("bad batch 1"));
    }
}
