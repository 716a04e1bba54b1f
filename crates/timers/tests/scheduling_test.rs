//! Firing order, cancellation and rescheduling of callback timers.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(clippy::arithmetic_side_effects)]

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tempo_core::{ManualClock, Timestamp};
use tempo_timers::{EventType, TimerConfig, TimerError, TimerId, TimerService};

const TICK: EventType = EventType::new(1);
const OTHER: EventType = EventType::new(2);

type Log = Arc<Mutex<Vec<(TimerId, i64)>>>;

fn at(ms: i64) -> Timestamp {
    Timestamp::from_millis(ms)
}

fn setup() -> (TimerService, ManualClock) {
    let clock = ManualClock::new(at(0));
    let timers = match TimerService::new(TimerConfig::default(), Arc::new(clock.clone())) {
        Ok(timers) => timers,
        Err(e) => panic!("default config should be valid: {e}"),
    };
    (timers, clock)
}

/// Record (timer, fire time) for every firing of `event_type`.
fn record(timers: &TimerService, event_type: EventType) -> Log {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    timers.register_fn(event_type, move |_, fired| {
        sink.lock().push((fired.id, fired.fired_at.as_millis()));
        Ok(())
    });
    log
}

fn tick_at(timers: &TimerService, clock: &ManualClock, ms: i64) -> usize {
    clock.set(at(ms));
    timers.tick().unwrap().fired
}

#[test]
fn test_once_fires_exactly_once_at_expiry() {
    // GIVEN: A once timer at t=100
    let (timers, clock) = setup();
    let log = record(&timers, TICK);
    let id = timers.schedule_once(at(100), TICK, serde_json::Value::Null);

    // WHEN/THEN: Nothing before, one firing at, nothing after
    assert_eq!(tick_at(&timers, &clock, 50), 0);
    assert_eq!(tick_at(&timers, &clock, 100), 1);
    assert_eq!(tick_at(&timers, &clock, 150), 0);
    assert_eq!(*log.lock(), vec![(id, 100)]);
}

#[test]
fn test_repeating_fires_once_per_interval() {
    // GIVEN: A repeating timer with interval 1000 registered at t=0
    let (timers, clock) = setup();
    let log = record(&timers, TICK);
    let id = timers
        .schedule_repeating(Duration::from_millis(1_000), TICK, serde_json::Value::Null)
        .unwrap();

    // WHEN: Ticking at each multiple, plus ticks in between
    for ms in [500, 1_000, 1_500, 2_000, 2_999, 3_000] {
        tick_at(&timers, &clock, ms);
    }

    // THEN: Exactly one firing per interval
    assert_eq!(*log.lock(), vec![(id, 1_000), (id, 2_000), (id, 3_000)]);
    assert_eq!(timers.next_expiry(), Some(at(4_000)));
}

#[test]
fn test_repeating_reschedules_from_actual_fire_time() {
    // GIVEN: A repeating timer due at 1000 that is observed late
    let (timers, clock) = setup();
    let log = record(&timers, TICK);
    timers
        .schedule_repeating(Duration::from_millis(1_000), TICK, serde_json::Value::Null)
        .unwrap();

    // WHEN: The first tick past the expiry is at 2500
    assert_eq!(tick_at(&timers, &clock, 2_500), 1);

    // THEN: It fires once and the next expiry counts from 2500
    assert_eq!(log.lock().len(), 1);
    assert_eq!(timers.next_expiry(), Some(at(3_500)));
}

#[test]
fn test_same_expiry_fires_in_registration_order() {
    // GIVEN: A then B, both at t=100, registered under different tags
    let (timers, clock) = setup();
    let order = Arc::new(Mutex::new(Vec::new()));
    for event_type in [TICK, OTHER] {
        let sink = Arc::clone(&order);
        timers.register_fn(event_type, move |_, fired| {
            sink.lock().push(fired.id);
            Ok(())
        });
    }
    let a = timers.schedule_once(at(100), OTHER, serde_json::Value::Null);
    let b = timers.schedule_once(at(100), TICK, serde_json::Value::Null);

    // WHEN: Sweeping at t=100
    tick_at(&timers, &clock, 100);

    // THEN: A fires before B
    assert_eq!(*order.lock(), vec![a, b]);
}

#[test]
fn test_sweep_orders_by_expiry_then_registration() {
    // GIVEN: Timers registered out of expiry order
    let (timers, clock) = setup();
    let log = record(&timers, TICK);
    let late = timers.schedule_once(at(300), TICK, serde_json::Value::Null);
    let early_1 = timers.schedule_once(at(100), TICK, serde_json::Value::Null);
    let mid = timers.schedule_once(at(200), TICK, serde_json::Value::Null);
    let early_2 = timers.schedule_once(at(100), TICK, serde_json::Value::Null);

    // WHEN: One sweep covers all of them
    assert_eq!(tick_at(&timers, &clock, 1_000), 4);

    // THEN: Ascending expiry, FIFO within the shared expiry
    let fired: Vec<TimerId> = log.lock().iter().map(|(id, _)| *id).collect();
    assert_eq!(fired, vec![early_1, early_2, mid, late]);
}

#[test]
fn test_cancel_before_expiry_prevents_firing() {
    // GIVEN: A pending once timer
    let (timers, clock) = setup();
    let log = record(&timers, TICK);
    let id = timers.schedule_once(at(100), TICK, serde_json::Value::Null);

    // WHEN: Cancelled before its expiry
    assert!(timers.cancel(id));

    // THEN: It never fires and cancelling again is a no-op
    assert_eq!(tick_at(&timers, &clock, 200), 0);
    assert!(log.lock().is_empty());
    assert!(!timers.cancel(id));
    assert_eq!(timers.next_expiry(), None);
}

#[test]
fn test_cancel_after_firing_returns_false() {
    let (timers, clock) = setup();
    let log = record(&timers, TICK);
    let id = timers.schedule_once(at(100), TICK, serde_json::Value::Null);

    tick_at(&timers, &clock, 100);

    assert!(!timers.cancel(id));
    assert_eq!(log.lock().len(), 1);
}

#[test]
fn test_cancel_repeating_stops_future_firings() {
    // GIVEN: A repeating timer that fired twice
    let (timers, clock) = setup();
    let log = record(&timers, TICK);
    let id = timers
        .schedule_repeating(Duration::from_millis(100), TICK, serde_json::Value::Null)
        .unwrap();
    tick_at(&timers, &clock, 100);
    tick_at(&timers, &clock, 200);

    // WHEN: It is cancelled
    assert!(timers.cancel(id));

    // THEN: No further firings; past ones stay recorded
    tick_at(&timers, &clock, 300);
    tick_at(&timers, &clock, 400);
    assert_eq!(*log.lock(), vec![(id, 100), (id, 200)]);
    assert_eq!(timers.pending_count(), 0);
}

#[test]
fn test_handler_can_cancel_its_own_repeating_timer() {
    // GIVEN: A repeating handler that cancels itself on the second firing
    let (timers, clock) = setup();
    let count = Arc::new(Mutex::new(0u32));
    let sink = Arc::clone(&count);
    timers.register_fn(TICK, move |timers, fired| {
        let mut count = sink.lock();
        *count += 1;
        if *count == 2 {
            assert!(timers.cancel(fired.id));
        }
        Ok(())
    });
    let id = timers
        .schedule_repeating(Duration::from_millis(100), TICK, serde_json::Value::Null)
        .unwrap();

    // WHEN: Ticking well past several intervals
    for ms in [100, 200, 300, 400] {
        tick_at(&timers, &clock, ms);
    }

    // THEN: It was not rescheduled after cancelling itself
    assert_eq!(*count.lock(), 2);
    assert!(!timers.is_pending(id));
}

#[test]
fn test_once_timer_is_consumed_before_its_handler_runs() {
    // GIVEN: A once handler that tries to cancel the timer being fired
    let (timers, clock) = setup();
    let seen: Arc<Mutex<Option<(bool, bool)>>> = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    timers.register_fn(TICK, move |timers, fired| {
        *sink.lock() = Some((timers.is_pending(fired.id), timers.cancel(fired.id)));
        Ok(())
    });
    timers.schedule_once(at(100), TICK, serde_json::Value::Null);

    // WHEN: It fires
    assert_eq!(tick_at(&timers, &clock, 100), 1);

    // THEN: From inside its handler it is already gone, so cancel is a no-op
    assert_eq!(*seen.lock(), Some((false, false)));
    assert_eq!(timers.pending_count(), 0);
}

#[test]
fn test_panicking_once_handler_does_not_leak_its_timer() {
    // GIVEN: A once timer whose handler panics
    let (timers, clock) = setup();
    timers.register_fn(TICK, |_, _| panic!("handler panicked"));
    let id = timers.schedule_once(at(100), TICK, serde_json::Value::Null);

    // WHEN: The host catches the unwind out of tick
    clock.set(at(100));
    let unwound = panic::catch_unwind(AssertUnwindSafe(|| timers.tick()));

    // THEN: The timer was destroyed and the scheduler keeps working
    assert!(unwound.is_err());
    assert!(!timers.is_pending(id));
    assert_eq!(timers.pending_count(), 0);
    assert!(timers.tick().unwrap().is_idle());
}

#[test]
fn test_panicking_repeating_handler_keeps_its_timer() {
    // GIVEN: A repeating timer whose handler panics on the first firing
    let (timers, clock) = setup();
    timers.register_fn(TICK, |_, _| panic!("handler panicked"));
    let id = timers
        .schedule_repeating(Duration::from_millis(100), TICK, serde_json::Value::Null)
        .unwrap();

    clock.set(at(100));
    let unwound = panic::catch_unwind(AssertUnwindSafe(|| timers.tick()));
    assert!(unwound.is_err());

    // THEN: It was put back one interval later
    assert!(timers.is_pending(id));
    assert_eq!(timers.next_expiry(), Some(at(200)));

    // AND: Fires again once the handler behaves
    let log = record(&timers, TICK);
    assert_eq!(tick_at(&timers, &clock, 200), 1);
    assert_eq!(*log.lock(), vec![(id, 200)]);
}

#[test]
fn test_timer_scheduled_by_handler_waits_for_next_tick() {
    // GIVEN: A handler that schedules another timer already due
    let (timers, clock) = setup();
    let log = record(&timers, OTHER);
    timers.register_fn(TICK, |timers, fired| {
        timers.schedule_once(fired.fired_at, OTHER, serde_json::Value::Null);
        Ok(())
    });
    timers.schedule_once(at(100), TICK, serde_json::Value::Null);

    // WHEN: The first timer fires
    assert_eq!(tick_at(&timers, &clock, 100), 1);

    // THEN: The new one is not swept in the same tick, only in the next
    assert!(log.lock().is_empty());
    assert_eq!(timers.tick().unwrap().fired, 1);
    assert_eq!(log.lock().len(), 1);
}

#[test]
fn test_cancel_of_collected_timer_is_skipped() {
    // GIVEN: Two timers due together; the first handler cancels the second
    let (timers, clock) = setup();
    let victim: Arc<Mutex<Option<TimerId>>> = Arc::new(Mutex::new(None));
    let target = Arc::clone(&victim);
    timers.register_fn(TICK, move |timers, _| {
        let mut slot = target.lock();
        timers.cancel_take(&mut slot);
        Ok(())
    });
    let log = record(&timers, OTHER);
    timers.schedule_once(at(100), TICK, serde_json::Value::Null);
    *victim.lock() = Some(timers.schedule_once(at(100), OTHER, serde_json::Value::Null));

    // WHEN: Both are collected by one sweep
    clock.set(at(100));
    let summary = timers.tick().unwrap();

    // THEN: The cancelled one is skipped silently
    assert_eq!(summary.fired, 1);
    assert_eq!(summary.skipped, 1);
    assert!(log.lock().is_empty());
}

#[test]
fn test_handler_failure_propagates_and_remaining_timers_fire_next_tick() {
    // GIVEN: Three timers at the same expiry, the first one's handler fails
    let (timers, clock) = setup();
    timers.register_fn(OTHER, |_, _| Err("handler exploded".into()));
    let log = record(&timers, TICK);
    let failing = timers.schedule_once(at(100), OTHER, serde_json::Value::Null);
    let second = timers.schedule_once(at(100), TICK, serde_json::Value::Null);
    let third = timers.schedule_once(at(100), TICK, serde_json::Value::Null);

    // WHEN: Sweeping at t=100
    clock.set(at(100));
    let result = timers.tick();

    // THEN: The error names the failing timer and the rest are still queued
    match result {
        Err(TimerError::Handler {
            timer_id,
            event_type,
            ..
        }) => {
            assert_eq!(timer_id, failing);
            assert_eq!(event_type, OTHER);
        }
        other => panic!("expected handler failure, got {other:?}"),
    }
    assert!(!timers.is_pending(failing), "once timers are consumed even on failure");
    assert!(log.lock().is_empty());

    // AND: The next tick fires them in order without time advancing
    assert_eq!(timers.tick().unwrap().fired, 2);
    let fired: Vec<TimerId> = log.lock().iter().map(|(id, _)| *id).collect();
    assert_eq!(fired, vec![second, third]);
}

#[test]
fn test_failing_repeating_timer_is_still_rescheduled() {
    let (timers, clock) = setup();
    timers.register_fn(TICK, |_, _| Err("nope".into()));
    let id = timers
        .schedule_repeating(Duration::from_millis(100), TICK, serde_json::Value::Null)
        .unwrap();

    clock.set(at(100));
    assert!(timers.tick().is_err());
    assert!(timers.is_pending(id));
    assert_eq!(timers.next_expiry(), Some(at(200)));
}

#[test]
fn test_payload_reaches_handler() {
    let (timers, clock) = setup();
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    timers.register_fn(TICK, move |_, fired| {
        *sink.lock() = fired.payload.get("unit").and_then(|v| v.as_str()).map(String::from);
        Ok(())
    });

    timers.schedule_once(at(10), TICK, serde_json::json!({"unit": "archer"}));
    tick_at(&timers, &clock, 10);

    assert_eq!(seen.lock().as_deref(), Some("archer"));
}

#[test]
fn test_frame_interval_from_config() {
    // GIVEN: A server-style config where frame timers run every 100ms
    let clock = ManualClock::new(at(0));
    let config = TimerConfig::new().with_frame_interval_ms(100);
    let timers = TimerService::new(config, Arc::new(clock.clone())).unwrap();
    let log = record(&timers, TICK);
    timers.schedule_frame(TICK, serde_json::Value::Null);

    // WHEN: Ticking every 50ms
    for ms in [50, 100, 150, 200] {
        tick_at(&timers, &clock, ms);
    }

    // THEN: It fires on the 100ms cadence
    let times: Vec<i64> = log.lock().iter().map(|(_, ms)| *ms).collect();
    assert_eq!(times, vec![100, 200]);
}

#[test]
fn test_many_timers_each_fire_once() {
    // GIVEN: Timers spread over 0..1000 with colliding expiries
    let (timers, clock) = setup();
    let log = record(&timers, TICK);
    let ids: Vec<TimerId> = (0..200)
        .map(|n| timers.schedule_once(at((n * 37) % 1_000), TICK, serde_json::Value::Null))
        .collect();

    // WHEN: Ticking every 10ms across the range
    for ms in (0..=1_000).step_by(10) {
        tick_at(&timers, &clock, ms);
    }

    // THEN: Every timer fired exactly once, never before its expiry
    let log = log.lock();
    assert_eq!(log.len(), ids.len());
    for (n, id) in ids.iter().enumerate() {
        let expiry = (n as i64 * 37) % 1_000;
        let firings: Vec<i64> = log.iter().filter(|(f, _)| f == id).map(|(_, ms)| *ms).collect();
        assert_eq!(firings.len(), 1);
        assert!(firings.iter().all(|ms| *ms >= expiry));
    }
    assert_eq!(timers.pending_count(), 0);
}
