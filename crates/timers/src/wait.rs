//! Suspension bridge for awaitable timers.
//!
//! A waiting task holds the receiving half of a oneshot; the timer entry
//! holds the sending half plus the waiter's cancellation token. Whoever
//! destroys the entry (the sweep, `cancel`, or `clear`) is the only one able
//! to send, so the waiter observes exactly one outcome.

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::entry::TimerId;
use crate::service::TimerService;

/// How a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitOutcome {
    /// The deadline passed.
    Fired,
    /// The wait was cancelled before the deadline was observed.
    Cancelled,
}

impl WaitOutcome {
    /// Check if the deadline passed.
    #[must_use]
    pub const fn is_fired(self) -> bool {
        matches!(self, Self::Fired)
    }

    /// Check if the wait was cancelled.
    #[must_use]
    pub const fn is_cancelled(self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// What registering a wait produced.
pub(crate) enum WaitRegistration {
    /// Resolved without creating an entry.
    Ready(WaitOutcome),
    /// An entry is pending in the scheduler.
    Pending {
        guard: WaitGuard,
        receiver: oneshot::Receiver<WaitOutcome>,
    },
}

impl WaitRegistration {
    pub(crate) async fn resolve(self, cancel: CancellationToken) -> WaitOutcome {
        match self {
            Self::Ready(outcome) => outcome,
            Self::Pending { guard, receiver } => guard.resolve(receiver, cancel).await,
        }
    }
}

/// Owns a pending wait entry on behalf of the waiting task.
///
/// Dropping the guard before the wait resolves destroys the entry, so an
/// abandoned wait never lingers in the scheduler.
pub(crate) struct WaitGuard {
    timers: TimerService,
    id: TimerId,
    armed: bool,
}

impl WaitGuard {
    pub(crate) const fn new(timers: TimerService, id: TimerId) -> Self {
        Self {
            timers,
            id,
            armed: true,
        }
    }

    async fn resolve(
        mut self,
        mut receiver: oneshot::Receiver<WaitOutcome>,
        cancel: CancellationToken,
    ) -> WaitOutcome {
        let woken = tokio::select! {
            biased;
            result = &mut receiver => Some(result.unwrap_or(WaitOutcome::Cancelled)),
            () = cancel.cancelled() => None,
        };

        let outcome = match woken {
            Some(outcome) => outcome,
            // Only the path that destroys the entry may report; if the sweep
            // got there first its result is already in the channel.
            None if self.timers.cancel(self.id) => WaitOutcome::Cancelled,
            None => receiver.await.unwrap_or(WaitOutcome::Cancelled),
        };

        self.armed = false;
        debug!(timer_id = %self.id, ?outcome, "Wait resolved");
        outcome
    }
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        if self.armed && self.timers.cancel(self.id) {
            debug!(timer_id = %self.id, "Abandoned wait removed");
        }
    }
}
