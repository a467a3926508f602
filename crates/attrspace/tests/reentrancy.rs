use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex, OnceLock};
use std::time::Duration;

use attrspace::time::ManualClock;
use attrspace::{
    AttributeChange, AttributeSpace, AttributeSpaceConfig, Notification, PatternSpec,
    SubscriptionId,
};

fn immediate_space(max_loop_detection: u32) -> Arc<AttributeSpace> {
    Arc::new(
        AttributeSpace::new(
            AttributeSpaceConfig::default()
                .with_batching(false)
                .with_max_loop_detection(max_loop_detection),
        )
        .unwrap(),
    )
}

fn email(value: &str) -> AttributeChange {
    AttributeChange::new("email", value).with_entity("Cliente", "c1")
}

fn counter() -> (Arc<AtomicUsize>, impl Fn(&Notification) + Send + Sync + 'static) {
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_clone = Arc::clone(&hits);
    (hits, move |_n: &Notification| {
        hits_clone.fetch_add(1, Ordering::SeqCst);
    })
}

// --- Loop safety ---

#[test]
fn test_unconditional_renotify_terminates_with_pinned_counts() {
    let space = immediate_space(3);
    let calls = Arc::new(AtomicUsize::new(0));

    let weak = Arc::downgrade(&space);
    let calls_clone = Arc::clone(&calls);
    let id = space
        .subscribe(PatternSpec::new().attribute_name("email"), move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            if let Some(space) = weak.upgrade() {
                space.notify_change(email("again"));
            }
        })
        .unwrap();

    space.notify_change(email("root"));

    // Root plus two re-entries admitted, the third re-entry dropped
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let stats = space.stats();
    assert_eq!(stats.total_notifications, 4);
    assert_eq!(stats.dropped_notifications, 1);
    assert_eq!(stats.delivered_notifications, 3);
    // The dropped re-entry never reached pattern matching
    assert_eq!(space.subscription_info(id).unwrap().match_count, 3);

    // Next root chain starts fresh
    space.notify_change(email("root"));
    assert_eq!(calls.load(Ordering::SeqCst), 6);
    assert_eq!(space.stats().dropped_notifications, 2);
    assert_eq!(space.subscription_info(id).unwrap().match_count, 6);
}

#[test]
fn test_ping_pong_between_subscribers_is_bounded() {
    let space = immediate_space(5);
    let weak = Arc::downgrade(&space);
    let weak_b = weak.clone();

    space
        .subscribe(PatternSpec::new().attribute_name("ping"), move |_| {
            if let Some(space) = weak.upgrade() {
                space.notify_change(AttributeChange::new("pong", 1).with_entity("Cliente", "c1"));
            }
        })
        .unwrap();
    space
        .subscribe(PatternSpec::new().attribute_name("pong"), move |_| {
            if let Some(space) = weak_b.upgrade() {
                space.notify_change(AttributeChange::new("ping", 1).with_entity("Cliente", "c1"));
            }
        })
        .unwrap();

    space.notify_change(AttributeChange::new("ping", 1).with_entity("Cliente", "c1"));

    let stats = space.stats();
    assert_eq!(stats.total_notifications, 6);
    assert_eq!(stats.dropped_notifications, 1);
}

#[test]
fn test_renotify_from_batched_callback_starts_new_chain() {
    let clock = Arc::new(ManualClock::new());
    let space = Arc::new(
        AttributeSpace::with_clock(
            AttributeSpaceConfig::default().with_batch_delay(Duration::from_millis(10)),
            clock.clone(),
        )
        .unwrap(),
    );

    let weak = Arc::downgrade(&space);
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_clone = Arc::clone(&hits);
    space
        .subscribe(PatternSpec::new().attribute_name("email"), move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
            if let Some(space) = weak.upgrade() {
                space.notify_change(email("echo"));
            }
        })
        .unwrap();

    space.notify_change(email("root"));
    for _ in 0..5 {
        clock.advance(Duration::from_millis(10));
        assert_eq!(space.poll_timers(), 1);
    }

    // Each flush re-opens one batch; nothing is ever suppressed
    assert_eq!(hits.load(Ordering::SeqCst), 5);
    assert_eq!(space.pending_batches(), 1);
    assert_eq!(space.stats().dropped_notifications, 0);
}

// --- Mutation during dispatch ---

#[test]
fn test_unsubscribe_of_later_subscriber_mid_dispatch() {
    let space = immediate_space(3);
    let victim: Arc<OnceLock<SubscriptionId>> = Arc::new(OnceLock::new());

    let weak = Arc::downgrade(&space);
    let victim_clone = Arc::clone(&victim);
    space
        .subscribe(PatternSpec::new().attribute_name("email"), move |_| {
            if let (Some(space), Some(id)) = (weak.upgrade(), victim_clone.get()) {
                space.unsubscribe(*id);
            }
        })
        .unwrap();

    let (victim_hits, victim_cb) = counter();
    let id = space
        .subscribe(PatternSpec::new().attribute_name("email"), victim_cb)
        .unwrap();
    victim.set(id).unwrap();

    space.notify_change(email("x"));
    assert_eq!(victim_hits.load(Ordering::SeqCst), 0);
    assert_eq!(space.subscription_count(), 1);
}

#[test]
fn test_subscribe_mid_dispatch_misses_in_flight_event() {
    let space = immediate_space(3);
    let late_hits = Arc::new(AtomicUsize::new(0));
    let added = Arc::new(AtomicBool::new(false));

    let weak = Arc::downgrade(&space);
    let late_clone = Arc::clone(&late_hits);
    let added_clone = Arc::clone(&added);
    space
        .subscribe(PatternSpec::new().attribute_name("email"), move |_| {
            if added_clone.swap(true, Ordering::SeqCst) {
                return;
            }
            if let Some(space) = weak.upgrade() {
                let late = Arc::clone(&late_clone);
                space
                    .subscribe(PatternSpec::new().attribute_name("email"), move |_| {
                        late.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap();
            }
        })
        .unwrap();

    space.notify_change(email("first"));
    assert_eq!(late_hits.load(Ordering::SeqCst), 0);
    assert_eq!(space.subscription_count(), 2);

    space.notify_change(email("second"));
    assert_eq!(late_hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unsubscribe_of_later_subscriber_mid_batch_flush() {
    let clock = Arc::new(ManualClock::new());
    let space = Arc::new(
        AttributeSpace::with_clock(AttributeSpaceConfig::default(), clock.clone()).unwrap(),
    );
    let later: Arc<OnceLock<SubscriptionId>> = Arc::new(OnceLock::new());

    let weak = Arc::downgrade(&space);
    let later_clone = Arc::clone(&later);
    space
        .subscribe(PatternSpec::new().attribute_name("email"), move |_| {
            if let (Some(space), Some(id)) = (weak.upgrade(), later_clone.get()) {
                space.unsubscribe(*id);
            }
        })
        .unwrap();
    let (later_hits, later_cb) = counter();
    later
        .set(
            space
                .subscribe(PatternSpec::new().attribute_name("email"), later_cb)
                .unwrap(),
        )
        .unwrap();

    space.notify_change(email("x"));
    assert_eq!(space.pending_batches(), 2);

    clock.advance(Duration::from_millis(50));
    assert_eq!(space.poll_timers(), 1);
    assert_eq!(later_hits.load(Ordering::SeqCst), 0);
}

// --- Failure isolation ---

#[test]
fn test_panicking_callback_does_not_stop_dispatch() {
    let space = immediate_space(3);
    let order = Arc::new(Mutex::new(Vec::new()));

    let order_a = Arc::clone(&order);
    space
        .subscribe(PatternSpec::new().attribute_name("email"), move |_| {
            order_a.lock().unwrap().push("a");
        })
        .unwrap();
    space
        .subscribe(PatternSpec::new().attribute_name("email"), |_| {
            panic!("render exploded");
        })
        .unwrap();
    let order_c = Arc::clone(&order);
    space
        .subscribe(PatternSpec::new().attribute_name("email"), move |_| {
            order_c.lock().unwrap().push("c");
        })
        .unwrap();

    space.notify_change(email("x"));
    space.notify_change(email("y"));

    assert_eq!(*order.lock().unwrap(), vec!["a", "c", "a", "c"]);
    let stats = space.stats();
    assert_eq!(stats.callback_errors, 2);
    assert_eq!(stats.delivered_notifications, 6);
}

#[test]
fn test_panicking_batched_callback_is_isolated() {
    let clock = Arc::new(ManualClock::new());
    let space =
        AttributeSpace::with_clock(AttributeSpaceConfig::default(), clock.clone()).unwrap();

    space
        .subscribe(PatternSpec::new().attribute_name("email"), |_| {
            panic!("deferred render exploded");
        })
        .unwrap();
    let (hits, cb) = counter();
    space
        .subscribe(PatternSpec::new().attribute_name("email"), cb)
        .unwrap();

    space.notify_change(email("x"));
    clock.advance(Duration::from_millis(50));

    assert_eq!(space.poll_timers(), 2);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(space.stats().callback_errors, 1);
}

// --- Shared across threads ---

#[test]
fn test_concurrent_roots_on_other_threads_are_not_nested() {
    let space = immediate_space(1);
    let in_callback = Arc::new(Barrier::new(2));

    let barrier = Arc::clone(&in_callback);
    space
        .subscribe(PatternSpec::new().attribute_name("slow"), move |_| {
            // Hold this chain open until the other thread has notified
            barrier.wait();
            barrier.wait();
        })
        .unwrap();
    let (fast_hits, fast_cb) = counter();
    space
        .subscribe(PatternSpec::new().attribute_name("fast"), fast_cb)
        .unwrap();

    let slow = {
        let space = Arc::clone(&space);
        std::thread::spawn(move || {
            space.notify_change(AttributeChange::new("slow", 1).with_entity("Cliente", "c1"));
        })
    };

    in_callback.wait();
    space.notify_change(AttributeChange::new("fast", 1).with_entity("Cliente", "c2"));
    in_callback.wait();
    slow.join().unwrap();

    assert_eq!(fast_hits.load(Ordering::SeqCst), 1);
    let stats = space.stats();
    assert_eq!(stats.total_notifications, 2);
    assert_eq!(stats.dropped_notifications, 0);
    assert_eq!(stats.delivered_notifications, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_driver_on_multi_thread_runtime() {
    let space = Arc::new(
        AttributeSpace::new(
            AttributeSpaceConfig::default().with_batch_delay(Duration::from_millis(20)),
        )
        .unwrap(),
    );
    let (hits, cb) = counter();
    space
        .subscribe(PatternSpec::new().attribute_name_pattern("indirizzo_*"), cb)
        .unwrap();

    let (tx, rx) = tokio::sync::watch::channel(false);
    let driver = tokio::spawn(attrspace::BatchTimerDriver::new(Arc::clone(&space), rx).run());

    let publisher = {
        let space = Arc::clone(&space);
        tokio::task::spawn_blocking(move || {
            space.notify_change(
                AttributeChange::new("indirizzo_via", "Via Roma").with_entity("Cliente", "c1"),
            );
            space.notify_change(
                AttributeChange::new("indirizzo_citta", "Torino").with_entity("Cliente", "c1"),
            );
        })
    };
    publisher.await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while hits.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    tx.send(true).unwrap();
    assert_eq!(driver.await.unwrap(), 2);
}
