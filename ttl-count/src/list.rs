use std::collections::VecDeque;

use crate::Instant;

/// Expiration instants of live admissions, earliest first.
///
/// The list is not synchronised itself; [`crate::RequestCounter`] owns it
/// behind the same lock as the [`crate::AdmissionGate`].
#[derive(Debug, Default, Clone)]
pub struct AdmissionList {
    entries: VecDeque<Instant>,
}

impl AdmissionList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a list from previously issued instants.
    ///
    /// Candidates are sorted ascending and anything not strictly after `now`
    /// is dropped, since it has already expired.
    pub fn seed<I>(candidates: I, now: Instant) -> Self
    where
        I: IntoIterator<Item = Instant>,
    {
        let mut live: Vec<Instant> = candidates.into_iter().filter(|i| *i > now).collect();
        live.sort_unstable();
        Self {
            entries: live.into(),
        }
    }

    /// Record a new expiration instant.
    ///
    /// With a constant ttl this is always a push to the tail. A wall clock
    /// that steps backwards can produce an earlier instant, which is placed
    /// at its sorted position instead.
    pub fn append(&mut self, instant: Instant) {
        match self.entries.back() {
            Some(last) if instant < *last => {
                let at = self.entries.partition_point(|e| *e <= instant);
                self.entries.insert(at, instant);
            }
            _ => self.entries.push_back(instant),
        }
    }

    pub fn peek_earliest(&self) -> Option<Instant> {
        self.entries.front().copied()
    }

    pub fn pop_earliest(&mut self) -> Option<Instant> {
        self.entries.pop_front()
    }

    /// Remove every entry at the head that expired at or before `now`.
    ///
    /// Returns the number of entries removed.
    pub fn pop_expired(&mut self, now: Instant) -> usize {
        let mut popped = 0;
        while self.peek_earliest().is_some_and(|head| head <= now) {
            self.entries.pop_front();
            popped += 1;
        }
        popped
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<Instant> {
        self.entries.iter().copied().collect()
    }

    #[cfg(test)]
    pub(crate) fn is_sorted(&self) -> bool {
        self.entries
            .iter()
            .zip(self.entries.iter().skip(1))
            .all(|(a, b)| a <= b)
    }
}
