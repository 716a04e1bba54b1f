//! The timer scheduler.
//!
//! [`TimerService`] owns the time index and every pending entry. The host
//! calls [`TimerService::tick`] once per time step; each tick moves all due
//! timers into a ready queue and then fires them in order:
//!
//! 1. Ascending expiry.
//! 2. Registration order among timers sharing an expiry.
//!
//! Collecting first and firing second keeps rescheduling (repeating timers,
//! handlers adding timers) from disturbing the scan in progress. Anything
//! scheduled while a tick runs is first eligible on the following tick.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tempo_core::{Clock, SystemClock, Timestamp};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::TimerConfig;
use crate::dispatch::{EventDispatcher, EventType, FiredTimer, FnHandler, HandlerResult, TimerHandler};
use crate::entry::{EntryRegistry, TimerAction, TimerEntry, TimerId, TimerKind};
use crate::error::{TimerError, TimerResult};
use crate::index::TimeIndex;
use crate::wait::{WaitGuard, WaitOutcome, WaitRegistration};

/// What a single tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Timers that fired (handlers run, waiters resumed).
    pub fired: usize,
    /// Due ids that were no longer live, or waits whose token was already
    /// cancelled.
    pub skipped: usize,
}

impl TickSummary {
    /// Check if the tick did nothing.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.fired == 0 && self.skipped == 0
    }
}

/// Mutable scheduler state. Always accessed under the service mutex.
#[derive(Debug)]
struct TimerState {
    registry: EntryRegistry,
    index: TimeIndex,
    /// Due ids not yet processed. Survives a failed tick so the remainder
    /// runs first on the next one.
    ready: VecDeque<TimerId>,
}

impl TimerState {
    fn new() -> Self {
        Self {
            registry: EntryRegistry::new(),
            index: TimeIndex::new(),
            ready: VecDeque::new(),
        }
    }

    fn schedule(&mut self, expiry: Timestamp, action: TimerAction) -> TimerId {
        let id = self.registry.create(expiry, action);
        self.index.insert(expiry, id);
        id
    }

    /// Pop the next ready id and work out what firing it means.
    ///
    /// Once and wait entries are destroyed here, before anything runs, so a
    /// `cancel` issued while the handler is running reports `false`. A
    /// repeating entry stays live until [`Self::finish_dispatch`] puts it back.
    fn next_step(&mut self) -> Step {
        let Some(id) = self.ready.pop_front() else {
            return Step::Done;
        };

        let Some(entry) = self.registry.get(id) else {
            // Cancelled between being collected and being processed.
            return Step::Skipped;
        };

        if entry.kind() == TimerKind::Repeated {
            return Dispatch::from_entry(entry).map_or(Step::Skipped, Step::Dispatch);
        }

        let Some(entry) = self.registry.destroy(id) else {
            return Step::Skipped;
        };

        if let Some(dispatch) = Dispatch::from_entry(&entry) {
            return Step::Dispatch(dispatch);
        }

        match entry.action {
            TimerAction::Wait { resolver, cancel } => {
                let outcome = if cancel.is_cancelled() {
                    WaitOutcome::Cancelled
                } else {
                    WaitOutcome::Fired
                };
                // The waiter may have been dropped; nothing to resume then.
                let _ = resolver.send(outcome);
                Step::Resolved(id, outcome)
            }
            TimerAction::Once { .. } | TimerAction::Repeated { .. } => Step::Skipped,
        }
    }

    /// Put a repeating timer back after its handler ran.
    fn finish_dispatch(&mut self, now: Timestamp, dispatch: &Dispatch) -> Option<Timestamp> {
        let interval = dispatch.interval?;

        // Gone if the handler cancelled its own timer.
        let entry = self.registry.get_mut(dispatch.id)?;
        let expiry = now.saturating_add(interval);
        entry.expiry = expiry;
        self.index.insert(expiry, dispatch.id);
        Some(expiry)
    }
}

enum Step {
    Done,
    Skipped,
    Resolved(TimerId, WaitOutcome),
    Dispatch(Dispatch),
}

/// A callback timer copied out of the state so its handler can run unlocked.
struct Dispatch {
    id: TimerId,
    kind: TimerKind,
    event_type: EventType,
    payload: Arc<serde_json::Value>,
    scheduled_for: Timestamp,
    interval: Option<Duration>,
}

impl Dispatch {
    fn from_entry(entry: &TimerEntry) -> Option<Self> {
        let (event_type, payload, interval) = match &entry.action {
            TimerAction::Once {
                event_type,
                payload,
            } => (*event_type, payload, None),
            TimerAction::Repeated {
                event_type,
                payload,
                interval,
            } => (*event_type, payload, Some(*interval)),
            TimerAction::Wait { .. } => return None,
        };

        Some(Self {
            id: entry.id,
            kind: entry.kind(),
            event_type,
            payload: Arc::clone(payload),
            scheduled_for: entry.expiry,
            interval,
        })
    }
}

/// Marks a sweep as running; released on drop, including on early return.
struct SweepGuard<'a>(&'a AtomicBool);

impl<'a> SweepGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Reinserts a repeating timer once its handler returns, or unwinds.
struct Reschedule<'a> {
    state: &'a Mutex<TimerState>,
    now: Timestamp,
    dispatch: &'a Dispatch,
}

impl Drop for Reschedule<'_> {
    fn drop(&mut self) {
        let next = self.state.lock().finish_dispatch(self.now, self.dispatch);
        trace!(
            timer_id = %self.dispatch.id,
            kind = %self.dispatch.kind,
            next = ?next,
            "Timer fired"
        );
    }
}

struct Shared {
    config: TimerConfig,
    clock: Arc<dyn Clock>,
    dispatcher: EventDispatcher,
    state: Mutex<TimerState>,
    sweeping: AtomicBool,
}

/// Handle to a timer scheduler.
///
/// Cheap to clone; clones share one scheduler. Pass it explicitly to the
/// code that needs timers.
#[derive(Clone)]
pub struct TimerService {
    shared: Arc<Shared>,
}

impl TimerService {
    /// Create a scheduler reading time from `clock`.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::Config`] if the configuration is invalid.
    pub fn new(config: TimerConfig, clock: Arc<dyn Clock>) -> TimerResult<Self> {
        config.validate()?;

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                clock,
                dispatcher: EventDispatcher::new(),
                state: Mutex::new(TimerState::new()),
                sweeping: AtomicBool::new(false),
            }),
        })
    }

    /// Create a scheduler on the system clock.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::Config`] if the configuration is invalid.
    pub fn with_system_clock(config: TimerConfig) -> TimerResult<Self> {
        Self::new(config, Arc::new(SystemClock::new()))
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &TimerConfig {
        &self.shared.config
    }

    /// Current time according to the scheduler's clock.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.shared.clock.now()
    }

    /// Register the handler for an event type, returning the one it replaced.
    pub fn register_handler(
        &self,
        event_type: EventType,
        handler: Arc<dyn TimerHandler>,
    ) -> Option<Arc<dyn TimerHandler>> {
        self.shared.dispatcher.register(event_type, handler)
    }

    /// Register a closure as the handler for an event type.
    pub fn register_fn<F>(&self, event_type: EventType, f: F) -> Option<Arc<dyn TimerHandler>>
    where
        F: Fn(&Self, &FiredTimer<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.register_handler(event_type, Arc::new(FnHandler::new(f)))
    }

    /// Remove the handler for an event type.
    pub fn unregister_handler(&self, event_type: EventType) -> Option<Arc<dyn TimerHandler>> {
        self.shared.dispatcher.unregister(event_type)
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.shared.dispatcher.len()
    }

    /// Fire `event_type` with `payload` once, at `at`.
    ///
    /// A time already in the past is logged and fires on the next tick.
    pub fn schedule_once(
        &self,
        at: Timestamp,
        event_type: EventType,
        payload: serde_json::Value,
    ) -> TimerId {
        let now = self.now();
        if at < now {
            warn!(expiry = %at, now = %now, %event_type, "Once timer scheduled in the past");
        }

        let id = self.shared.state.lock().schedule(
            at,
            TimerAction::Once {
                event_type,
                payload: Arc::new(payload),
            },
        );

        debug!(timer_id = %id, expiry = %at, %event_type, "Scheduled once timer");
        id
    }

    /// Fire `event_type` with `payload` every `interval`, starting one
    /// interval from now.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::IntervalTooShort`] if `interval` is below the
    /// configured minimum. No timer is created in that case.
    pub fn schedule_repeating(
        &self,
        interval: Duration,
        event_type: EventType,
        payload: serde_json::Value,
    ) -> TimerResult<TimerId> {
        let min = self.shared.config.min_repeat_interval();
        if interval < min {
            let interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
            error!(
                interval_ms,
                min_ms = self.shared.config.min_repeat_interval_ms,
                %event_type,
                "Repeating timer interval too small"
            );
            return Err(TimerError::interval_too_short(
                interval_ms,
                self.shared.config.min_repeat_interval_ms,
            ));
        }

        Ok(self.insert_repeating(interval, event_type, payload))
    }

    /// Fire `event_type` with `payload` at the configured frame interval.
    ///
    /// With the default `frame_interval_ms` of zero this fires on every tick.
    /// Not subject to the repeating-timer minimum.
    pub fn schedule_frame(&self, event_type: EventType, payload: serde_json::Value) -> TimerId {
        self.insert_repeating(self.shared.config.frame_interval(), event_type, payload)
    }

    fn insert_repeating(
        &self,
        interval: Duration,
        event_type: EventType,
        payload: serde_json::Value,
    ) -> TimerId {
        let expiry = self.now().saturating_add(interval);
        let id = self.shared.state.lock().schedule(
            expiry,
            TimerAction::Repeated {
                event_type,
                payload: Arc::new(payload),
                interval,
            },
        );

        debug!(
            timer_id = %id,
            expiry = %expiry,
            interval_ms = %interval.as_millis(),
            %event_type,
            "Scheduled repeating timer"
        );
        id
    }

    /// Suspend until `deadline` or until `cancel` fires.
    ///
    /// The timer is registered when this is called, not when the future is
    /// first polled. A deadline already reached resolves
    /// [`WaitOutcome::Fired`] and an already-cancelled token resolves
    /// [`WaitOutcome::Cancelled`]; neither creates a timer. Dropping the
    /// future removes the timer.
    ///
    /// The token is watched by the returned future, so a cancellation that
    /// lands before the future is first polled removes the timer only once
    /// the future runs, or when a sweep reaches the deadline. Until then the
    /// timer is still counted by [`Self::pending_count`]. The outcome is
    /// [`WaitOutcome::Cancelled`] either way.
    pub fn wait_until(
        &self,
        deadline: Timestamp,
        cancel: CancellationToken,
    ) -> impl Future<Output = WaitOutcome> + Send + use<> {
        let registration = self.register_wait(deadline, &cancel);
        registration.resolve(cancel)
    }

    /// Suspend for `delay`, or until `cancel` fires. A zero delay resolves
    /// [`WaitOutcome::Fired`] immediately.
    pub fn wait(
        &self,
        delay: Duration,
        cancel: CancellationToken,
    ) -> impl Future<Output = WaitOutcome> + Send + use<> {
        self.wait_until(self.now().saturating_add(delay), cancel)
    }

    /// Suspend until the first tick at which time has advanced.
    pub fn wait_frame(
        &self,
        cancel: CancellationToken,
    ) -> impl Future<Output = WaitOutcome> + Send + use<> {
        self.wait(Duration::from_millis(1), cancel)
    }

    fn register_wait(&self, deadline: Timestamp, cancel: &CancellationToken) -> WaitRegistration {
        if self.now() >= deadline {
            return WaitRegistration::Ready(WaitOutcome::Fired);
        }

        if cancel.is_cancelled() {
            return WaitRegistration::Ready(WaitOutcome::Cancelled);
        }

        let (resolver, receiver) = oneshot::channel();
        let id = self.shared.state.lock().schedule(
            deadline,
            TimerAction::Wait {
                resolver,
                cancel: cancel.clone(),
            },
        );

        debug!(timer_id = %id, expiry = %deadline, "Scheduled wait timer");
        WaitRegistration::Pending {
            guard: WaitGuard::new(self.clone(), id),
            receiver,
        }
    }

    /// Cancel a pending timer.
    ///
    /// Returns `true` if the timer was pending and is now destroyed; `false`
    /// if it already fired, was already cancelled, or never existed. A
    /// cancelled wait resolves [`WaitOutcome::Cancelled`]. Discard the id
    /// afterwards.
    pub fn cancel(&self, id: TimerId) -> bool {
        let entry = {
            let mut state = self.shared.state.lock();
            let Some(entry) = state.registry.destroy(id) else {
                return false;
            };
            // Absent from the index if already collected for this tick.
            state.index.remove(entry.expiry, id);
            entry
        };

        debug!(timer_id = %id, kind = %entry.kind(), "Timer cancelled");
        entry.resolve_cancelled();
        true
    }

    /// Cancel the timer in `slot`, leaving `None` behind.
    pub fn cancel_take(&self, slot: &mut Option<TimerId>) -> bool {
        slot.take().is_some_and(|id| self.cancel(id))
    }

    /// Run one sweep: fire every timer whose expiry is at or before now.
    ///
    /// Call once per host time step.
    ///
    /// # Errors
    ///
    /// - [`TimerError::Handler`] if an application handler fails. Timers not
    ///   yet processed stay queued and fire first on the next tick.
    /// - [`TimerError::SweepInProgress`] if called from inside a handler or
    ///   concurrently with another tick.
    pub fn tick(&self) -> TimerResult<TickSummary> {
        let Some(_sweep) = SweepGuard::acquire(&self.shared.sweeping) else {
            return Err(TimerError::SweepInProgress);
        };

        let now = self.now();
        let due = {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            state.index.drain_due(now, &mut state.ready)
        };
        if due > 0 {
            trace!(due, now = %now, "Collected due timers");
        }

        let mut summary = TickSummary::default();
        loop {
            let step = self.shared.state.lock().next_step();
            match step {
                Step::Done => break,
                Step::Skipped => summary.skipped = summary.skipped.saturating_add(1),
                Step::Resolved(id, outcome) => {
                    trace!(timer_id = %id, ?outcome, "Wait timer resolved");
                    if outcome.is_fired() {
                        summary.fired = summary.fired.saturating_add(1);
                    } else {
                        summary.skipped = summary.skipped.saturating_add(1);
                    }
                }
                Step::Dispatch(dispatch) => {
                    summary.fired = summary.fired.saturating_add(1);
                    self.dispatch(now, &dispatch)?;
                }
            }
        }

        Ok(summary)
    }

    fn dispatch(&self, now: Timestamp, dispatch: &Dispatch) -> TimerResult<()> {
        let fired = FiredTimer {
            id: dispatch.id,
            kind: dispatch.kind,
            event_type: dispatch.event_type,
            payload: &dispatch.payload,
            scheduled_for: dispatch.scheduled_for,
            fired_at: now,
        };

        let result = {
            let _reschedule = Reschedule {
                state: &self.shared.state,
                now,
                dispatch,
            };
            match self.shared.dispatcher.get(dispatch.event_type) {
                Some(handler) => handler.on_timer(self, &fired),
                None => {
                    warn!(
                        timer_id = %dispatch.id,
                        event_type = %dispatch.event_type,
                        "No handler registered for timer event"
                    );
                    Ok(())
                }
            }
        };

        result.map_err(|source| {
            error!(
                timer_id = %dispatch.id,
                event_type = %dispatch.event_type,
                error = %source,
                "Timer handler failed"
            );
            TimerError::handler(dispatch.id, dispatch.event_type, source)
        })
    }

    /// Number of live timers.
    ///
    /// Includes waits whose token was cancelled but whose future has not
    /// run since (see [`Self::wait_until`]).
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().registry.len()
    }

    /// Check if a timer is still live.
    #[must_use]
    pub fn is_pending(&self, id: TimerId) -> bool {
        self.shared.state.lock().registry.contains(id)
    }

    /// Kind of a live timer.
    #[must_use]
    pub fn kind_of(&self, id: TimerId) -> Option<TimerKind> {
        self.shared.state.lock().registry.get(id).map(TimerEntry::kind)
    }

    /// Earliest expiry among indexed timers.
    #[must_use]
    pub fn next_expiry(&self) -> Option<Timestamp> {
        self.shared.state.lock().index.next_expiry()
    }

    /// Destroy every timer. Pending waits resolve [`WaitOutcome::Cancelled`].
    ///
    /// Returns the number of timers destroyed.
    pub fn clear(&self) -> usize {
        let entries: Vec<TimerEntry> = {
            let mut state = self.shared.state.lock();
            state.index.clear();
            state.ready.clear();
            state.registry.drain().collect()
        };

        let count = entries.len();
        entries.into_iter().for_each(TimerEntry::resolve_cancelled);
        info!(count, "Cleared all timers");
        count
    }
}

impl fmt::Debug for TimerService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("TimerService")
            .field("config", &self.shared.config)
            .field("pending", &state.registry.len())
            .field("indexed", &state.index.len())
            .field("ready", &state.ready.len())
            .field("min_expiry", &state.index.min_expiry())
            .field("dispatcher", &self.shared.dispatcher)
            .finish()
    }
}
