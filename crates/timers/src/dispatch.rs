//! Routing fired timers to application handlers.
//!
//! Every callback timer carries an [`EventType`] tag. Handlers are registered
//! per tag through [`TimerService::register_handler`]; a firing timer looks
//! up its tag and calls the handler with the timer's payload.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tempo_core::Timestamp;

use crate::entry::{TimerId, TimerKind};
use crate::error::HandlerError;
use crate::service::TimerService;

/// Result returned by timer handlers.
pub type HandlerResult = Result<(), HandlerError>;

/// Tag selecting which handler a timer fires into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(u32);

impl EventType {
    /// Create an event type tag.
    #[must_use]
    pub const fn new(tag: u32) -> Self {
        Self(tag)
    }

    /// Get the raw tag.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event-{}", self.0)
    }
}

/// A timer being delivered to its handler.
#[derive(Debug, Clone, Copy)]
pub struct FiredTimer<'a> {
    /// The timer that fired.
    pub id: TimerId,
    /// `Once` or `Repeated`.
    pub kind: TimerKind,
    /// Tag the timer was registered with.
    pub event_type: EventType,
    /// Payload given at registration. Shared, read-only.
    pub payload: &'a serde_json::Value,
    /// Expiry the timer was due at.
    pub scheduled_for: Timestamp,
    /// Sweep time it actually fired at.
    pub fired_at: Timestamp,
}

impl FiredTimer<'_> {
    /// How late the firing was relative to its expiry.
    #[must_use]
    pub fn lateness(&self) -> std::time::Duration {
        self.fired_at.saturating_duration_since(self.scheduled_for)
    }
}

/// Application logic invoked when a timer fires.
///
/// Handlers run with the scheduler unlocked, so they may schedule new timers
/// or cancel existing ones (including the one firing) through `timers`.
/// Timers scheduled here are first eligible on the next tick.
pub trait TimerHandler: Send + Sync {
    /// Handle a fired timer.
    ///
    /// # Errors
    ///
    /// An error is propagated out of [`TimerService::tick`] unchanged.
    fn on_timer(&self, timers: &TimerService, fired: &FiredTimer<'_>) -> HandlerResult;
}

/// Adapter turning a closure into a [`TimerHandler`].
pub struct FnHandler<F>(F);

impl<F> FnHandler<F>
where
    F: Fn(&TimerService, &FiredTimer<'_>) -> HandlerResult + Send + Sync,
{
    /// Wrap a closure.
    pub const fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> TimerHandler for FnHandler<F>
where
    F: Fn(&TimerService, &FiredTimer<'_>) -> HandlerResult + Send + Sync,
{
    fn on_timer(&self, timers: &TimerService, fired: &FiredTimer<'_>) -> HandlerResult {
        (self.0)(timers, fired)
    }
}

/// Explicit mapping from event type to handler.
#[derive(Default)]
pub(crate) struct EventDispatcher {
    handlers: RwLock<HashMap<EventType, Arc<dyn TimerHandler>>>,
}

impl EventDispatcher {
    /// Create an empty dispatcher.
    #[must_use]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a handler, returning the one it replaced.
    pub(crate) fn register(
        &self,
        event_type: EventType,
        handler: Arc<dyn TimerHandler>,
    ) -> Option<Arc<dyn TimerHandler>> {
        self.handlers.write().insert(event_type, handler)
    }

    /// Remove a handler.
    pub(crate) fn unregister(&self, event_type: EventType) -> Option<Arc<dyn TimerHandler>> {
        self.handlers.write().remove(&event_type)
    }

    /// Look up a handler. The lock is released before the caller runs it.
    #[must_use]
    pub(crate) fn get(&self, event_type: EventType) -> Option<Arc<dyn TimerHandler>> {
        self.handlers.read().get(&event_type).map(Arc::clone)
    }

    /// Number of registered handlers.
    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.handlers.read().len()
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<EventType> = self.handlers.read().keys().copied().collect();
        types.sort_unstable();
        f.debug_struct("EventDispatcher")
            .field("event_types", &types)
            .finish()
    }
}
