//! Timer entries and the registry that owns them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tempo_core::Timestamp;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::dispatch::EventType;
use crate::wait::WaitOutcome;

/// Unique identifier for a timer.
///
/// Minted by the scheduler that owns the timer and never reused while that
/// scheduler lives. A stale id is harmless: cancelling it returns `false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimerId(u64);

impl TimerId {
    /// Wrap a raw id, e.g. one read back from a log line.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// What a timer does when it expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    /// Dispatch once, then destroy.
    Once,
    /// Resume a suspended waiter, then destroy.
    OnceWait,
    /// Dispatch, then reschedule at the same interval.
    Repeated,
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Once => write!(f, "once"),
            Self::OnceWait => write!(f, "once_wait"),
            Self::Repeated => write!(f, "repeated"),
        }
    }
}

/// Per-kind data carried by an entry.
pub(crate) enum TimerAction {
    Once {
        event_type: EventType,
        payload: Arc<serde_json::Value>,
    },
    Repeated {
        event_type: EventType,
        payload: Arc<serde_json::Value>,
        interval: Duration,
    },
    Wait {
        resolver: oneshot::Sender<WaitOutcome>,
        cancel: CancellationToken,
    },
}

impl TimerAction {
    pub(crate) const fn kind(&self) -> TimerKind {
        match self {
            Self::Once { .. } => TimerKind::Once,
            Self::Repeated { .. } => TimerKind::Repeated,
            Self::Wait { .. } => TimerKind::OnceWait,
        }
    }
}

/// One scheduled action.
pub(crate) struct TimerEntry {
    pub(crate) id: TimerId,
    /// Bucket this entry currently sits in within the time index.
    pub(crate) expiry: Timestamp,
    pub(crate) action: TimerAction,
}

impl TimerEntry {
    pub(crate) const fn kind(&self) -> TimerKind {
        self.action.kind()
    }

    /// Tell a waiter it will never fire. No-op for other kinds.
    pub(crate) fn resolve_cancelled(self) {
        if let TimerAction::Wait { resolver, .. } = self.action {
            // The waiter may already be gone.
            let _ = resolver.send(WaitOutcome::Cancelled);
        }
    }
}

impl fmt::Debug for TimerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerEntry")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("expiry", &self.expiry)
            .finish_non_exhaustive()
    }
}

/// Lifecycle manager for timer entries.
///
/// Mints ids and owns every live entry. An entry exists here exactly as long
/// as its timer is pending.
#[derive(Debug)]
pub(crate) struct EntryRegistry {
    next_id: u64,
    entries: HashMap<TimerId, TimerEntry>,
}

impl EntryRegistry {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 1,
            entries: HashMap::new(),
        }
    }

    /// Create an entry and return its fresh id.
    pub(crate) fn create(&mut self, expiry: Timestamp, action: TimerAction) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id = self.next_id.saturating_add(1);
        self.entries.insert(id, TimerEntry { id, expiry, action });
        id
    }

    pub(crate) fn get(&self, id: TimerId) -> Option<&TimerEntry> {
        self.entries.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: TimerId) -> Option<&mut TimerEntry> {
        self.entries.get_mut(&id)
    }

    pub(crate) fn contains(&self, id: TimerId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Remove an entry, handing ownership back to the caller.
    pub(crate) fn destroy(&mut self, id: TimerId) -> Option<TimerEntry> {
        self.entries.remove(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Remove every entry.
    pub(crate) fn drain(&mut self) -> impl Iterator<Item = TimerEntry> + '_ {
        self.entries.drain().map(|(_, entry)| entry)
    }
}
