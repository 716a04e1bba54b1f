//! Clock sources.
//!
//! Schedulers never read the system time directly; they ask a [`Clock`].
//! [`SystemClock`] is the production source, [`ManualClock`] is driven by
//! hand for tests and deterministic hosts.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::time::Timestamp;

/// A source of "now".
///
/// Implementations must be monotonic: successive calls never go backwards.
pub trait Clock: Send + Sync {
    /// The current time.
    fn now(&self) -> Timestamp;
}

/// Wall-clock aligned, monotonic clock.
///
/// The wall time is sampled once at construction and advanced with
/// [`Instant`], so adjustments to the system clock never move it backwards.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin_wall: Timestamp,
    origin: Instant,
    offset_ms: i64,
}

impl SystemClock {
    /// Create a clock anchored at the current wall time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin_wall: Timestamp::from_millis(Utc::now().timestamp_millis()),
            origin: Instant::now(),
            offset_ms: 0,
        }
    }

    /// Shift every reading by a fixed offset, e.g. the measured difference
    /// between a remote server's clock and the local one.
    #[must_use]
    pub const fn with_offset(mut self, offset_ms: i64) -> Self {
        self.offset_ms = offset_ms;
        self
    }

    /// The configured offset in milliseconds.
    #[must_use]
    pub const fn offset_ms(&self) -> i64 {
        self.offset_ms
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let elapsed = self.origin.elapsed();
        let local = self.origin_wall.saturating_add(elapsed);
        Timestamp::from_millis(local.as_millis().saturating_add(self.offset_ms))
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same reading, so a test can hand one clone to a
/// scheduler and keep another to advance time.
#[derive(Clone, Default)]
pub struct ManualClock {
    millis: Arc<AtomicI64>,
}

impl ManualClock {
    /// Create a clock reading `start`.
    #[must_use]
    pub fn new(start: Timestamp) -> Self {
        Self {
            millis: Arc::new(AtomicI64::new(start.as_millis())),
        }
    }

    /// Set the reading. Moving backwards is ignored to keep the clock monotonic.
    pub fn set(&self, to: Timestamp) {
        self.millis.fetch_max(to.as_millis(), Ordering::AcqRel);
    }

    /// Advance the reading and return the new time.
    pub fn advance(&self, by: Duration) -> Timestamp {
        let by_ms = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        let previous = self
            .millis
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |ms| {
                Some(ms.saturating_add(by_ms))
            })
            .unwrap_or_else(|ms| ms);
        Timestamp::from_millis(previous.saturating_add(by_ms))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.millis.load(Ordering::Acquire))
    }
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualClock")
            .field("now", &self.now())
            .finish()
    }
}
