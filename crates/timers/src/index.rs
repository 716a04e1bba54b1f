//! Ordered index from expiry time to the timers expiring then.

use std::collections::{BTreeMap, VecDeque};

use tempo_core::Timestamp;

use crate::entry::TimerId;

/// Multi-map of expiry time to timer ids.
///
/// Ids in a bucket keep insertion order, which is the tie-break for timers
/// sharing an expiry. Emptied buckets are deleted, never left behind.
#[derive(Debug)]
pub(crate) struct TimeIndex {
    buckets: BTreeMap<Timestamp, Vec<TimerId>>,
    /// Never greater than the smallest key present. `Timestamp::MAX` when
    /// nothing is pending.
    min_expiry: Timestamp,
    len: usize,
}

impl TimeIndex {
    pub(crate) const fn new() -> Self {
        Self {
            buckets: BTreeMap::new(),
            min_expiry: Timestamp::MAX,
            len: 0,
        }
    }

    pub(crate) fn insert(&mut self, expiry: Timestamp, id: TimerId) {
        self.buckets.entry(expiry).or_default().push(id);
        self.len = self.len.saturating_add(1);
        if expiry < self.min_expiry {
            self.min_expiry = expiry;
        }
    }

    /// Remove `id` from the bucket at `expiry`. Returns `false` if it was not there.
    ///
    /// The cached minimum is left alone: it may now be lower than the true
    /// minimum, which only costs the next sweep a scan.
    pub(crate) fn remove(&mut self, expiry: Timestamp, id: TimerId) -> bool {
        let Some(bucket) = self.buckets.get_mut(&expiry) else {
            return false;
        };

        let Some(position) = bucket.iter().position(|candidate| *candidate == id) else {
            return false;
        };

        bucket.remove(position);
        if bucket.is_empty() {
            self.buckets.remove(&expiry);
        }
        self.len = self.len.saturating_sub(1);
        true
    }

    /// Move every id with expiry `<= now` onto the back of `ready`, in
    /// ascending expiry order and insertion order within a bucket.
    ///
    /// Returns the number of ids moved. Cheap when nothing is due.
    pub(crate) fn drain_due(&mut self, now: Timestamp, ready: &mut VecDeque<TimerId>) -> usize {
        if self.is_empty() || now < self.min_expiry {
            return 0;
        }

        let mut moved = 0usize;
        while let Some(entry) = self.buckets.first_entry() {
            if *entry.key() > now {
                break;
            }
            let ids = entry.remove();
            moved = moved.saturating_add(ids.len());
            ready.extend(ids);
        }

        self.len = self.len.saturating_sub(moved);
        self.min_expiry = self.next_expiry().unwrap_or(Timestamp::MAX);
        moved
    }

    /// Earliest expiry present, if any.
    pub(crate) fn next_expiry(&self) -> Option<Timestamp> {
        self.buckets.keys().next().copied()
    }

    pub(crate) const fn min_expiry(&self) -> Timestamp {
        self.min_expiry
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn clear(&mut self) {
        self.buckets.clear();
        self.min_expiry = Timestamp::MAX;
        self.len = 0;
    }
}
