//! Timer error types.

use thiserror::Error;

use crate::dispatch::EventType;
use crate::entry::TimerId;

/// Boxed error returned by application timer handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while scheduling or sweeping timers.
#[derive(Debug, Error)]
pub enum TimerError {
    /// A repeating timer was registered below the configured minimum.
    /// No timer was created.
    #[error("repeating interval {interval_ms}ms is below the minimum of {min_ms}ms")]
    IntervalTooShort {
        /// Requested interval
        interval_ms: u64,
        /// Configured minimum
        min_ms: u64,
    },

    /// An application handler failed while a timer fired.
    #[error("handler for {event_type} failed on {timer_id}: {source}")]
    Handler {
        /// Timer that fired
        timer_id: TimerId,
        /// Event type whose handler failed
        event_type: EventType,
        /// Error returned by the handler
        #[source]
        source: HandlerError,
    },

    /// `tick` was called while a sweep was already running.
    #[error("timer sweep already in progress")]
    SweepInProgress,

    /// Invalid scheduler configuration.
    #[error(transparent)]
    Config(#[from] tempo_core::Error),
}

impl TimerError {
    /// Create an interval too short error.
    #[must_use]
    pub const fn interval_too_short(interval_ms: u64, min_ms: u64) -> Self {
        Self::IntervalTooShort {
            interval_ms,
            min_ms,
        }
    }

    /// Create a handler failure error.
    #[must_use]
    pub fn handler(timer_id: TimerId, event_type: EventType, source: HandlerError) -> Self {
        Self::Handler {
            timer_id,
            event_type,
            source,
        }
    }

    /// Check if the error came from application code rather than the scheduler.
    #[must_use]
    pub const fn is_handler_failure(&self) -> bool {
        matches!(self, Self::Handler { .. })
    }
}

/// Result type for timer operations.
pub type TimerResult<T> = Result<T, TimerError>;
