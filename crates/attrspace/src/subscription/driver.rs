//! Async batch timer driver.
//!
//! [`BatchTimerDriver`] calls [`AttributeSpace::poll_timers`] on a tokio
//! runtime so batched notifications are delivered without the host having
//! to poll. Hosts with their own event loop can skip it and call
//! `poll_timers` directly, using [`AttributeSpace::next_deadline_ms`] to
//! decide when.
//!
//! # Usage
//!
//! ```rust,ignore
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let driver = BatchTimerDriver::new(Arc::clone(&space), shutdown_rx);
//! let handle = tokio::spawn(driver.run());
//!
//! // ... later ...
//! shutdown_tx.send(true).unwrap();
//! handle.await.unwrap();
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::subscription::dispatcher::AttributeSpace;

/// Lower bound for the idle poll interval.
const MIN_IDLE_POLL: Duration = Duration::from_millis(1);

/// Drives batch deadlines for one [`AttributeSpace`].
#[derive(Debug)]
pub struct BatchTimerDriver {
    /// Bus being driven.
    space: Arc<AttributeSpace>,
    /// Shutdown signal receiver.
    shutdown: watch::Receiver<bool>,
    /// Sleep when nothing is pending.
    idle_poll: Duration,
}

impl BatchTimerDriver {
    /// Creates a driver.
    ///
    /// The idle poll interval defaults to a quarter of the batch window, so a
    /// batch opened while the driver sleeps fires at most that late.
    #[must_use]
    pub fn new(space: Arc<AttributeSpace>, shutdown: watch::Receiver<bool>) -> Self {
        let idle_poll = (space.config().batch_delay() / 4).max(MIN_IDLE_POLL);
        Self {
            space,
            shutdown,
            idle_poll,
        }
    }

    /// Overrides the idle poll interval.
    #[must_use]
    pub fn with_idle_poll(mut self, idle_poll: Duration) -> Self {
        self.idle_poll = idle_poll.max(MIN_IDLE_POLL);
        self
    }

    /// Returns the idle poll interval.
    #[must_use]
    pub fn idle_poll(&self) -> Duration {
        self.idle_poll
    }

    /// Runs until the shutdown signal is set (or its sender dropped) or the
    /// bus is shut down.
    ///
    /// Returns the number of batched notifications delivered.
    pub async fn run(mut self) -> u64 {
        let mut delivered: u64 = 0;

        loop {
            if *self.shutdown.borrow() || self.space.is_shut_down() {
                break;
            }

            delivered += self.space.poll_timers() as u64;

            let wait = match self.space.next_deadline_ms() {
                Some(deadline_ms) => {
                    let until = deadline_ms.saturating_sub(self.space.now_ms());
                    Duration::from_millis(until).min(self.idle_poll)
                }
                None => self.idle_poll,
            };

            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                () = tokio::time::sleep(wait) => {}
            }
        }

        if self.space.config().enable_logging {
            tracing::debug!(delivered, "batch timer driver stopped");
        }
        delivered
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::config::AttributeSpaceConfig;
    use crate::subscription::event::AttributeChange;
    use crate::subscription::filter::PatternSpec;

    fn space(delay_ms: u64) -> Arc<AttributeSpace> {
        Arc::new(
            AttributeSpace::new(
                AttributeSpaceConfig::default()
                    .with_batch_delay(Duration::from_millis(delay_ms))
                    .with_logging(false),
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_idle_poll_defaults() {
        let (_tx, rx) = watch::channel(false);
        let driver = BatchTimerDriver::new(space(40), rx.clone());
        assert_eq!(driver.idle_poll(), Duration::from_millis(10));

        let driver = BatchTimerDriver::new(space(0), rx.clone());
        assert_eq!(driver.idle_poll(), MIN_IDLE_POLL);

        let driver = BatchTimerDriver::new(space(40), rx).with_idle_poll(Duration::ZERO);
        assert_eq!(driver.idle_poll(), MIN_IDLE_POLL);
    }

    #[tokio::test]
    async fn test_driver_delivers_batches() {
        let space = space(50);
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);
        space
            .subscribe(PatternSpec::new().attribute_name("email"), move |n| {
                assert_eq!(n.batch_count, 3);
                hits_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(BatchTimerDriver::new(Arc::clone(&space), rx).run());

        for value in ["a", "b", "c"] {
            space.notify_change(AttributeChange::new("email", value).with_entity("Cliente", "c1"));
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while hits.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        tx.send(true).unwrap();
        let delivered = task.await.unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_driver_stops_when_bus_shut_down() {
        let space = space(10);
        let (_tx, rx) = watch::channel(false);
        let task = tokio::spawn(BatchTimerDriver::new(Arc::clone(&space), rx).run());

        space.shutdown();
        let delivered = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_driver_stops_when_sender_dropped() {
        let space = space(10);
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(BatchTimerDriver::new(space, rx).run());

        drop(tx);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
