use std::collections::BTreeMap;
use std::time::Instant;

/// Deadline-ordered timer queue. Events due at the same instant fire in
/// the order they were scheduled.
#[derive(Debug)]
pub struct TimerQueue<E> {
    entries: BTreeMap<(Instant, u64), E>,
    next_seq: u64,
}

impl<E> Default for TimerQueue<E> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_seq: 0,
        }
    }
}

impl<E> TimerQueue<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, at: Instant, event: E) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert((at, seq), event);
    }

    /// Drops every pending event matching `predicate`; returns how many.
    pub fn cancel_where(&mut self, mut predicate: impl FnMut(&E) -> bool) -> usize {
        let doomed: Vec<(Instant, u64)> = self
            .entries
            .iter()
            .filter(|(_, event)| predicate(event))
            .map(|(key, _)| *key)
            .collect();
        for key in &doomed {
            self.entries.remove(key);
        }
        doomed.len()
    }

    pub fn pop_due(&mut self, now: Instant) -> Vec<E> {
        let mut due = Vec::new();
        while let Some(entry) = self.entries.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let (_, event) = entry.remove_entry();
            due.push(event);
        }
        due
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.keys().next().map(|(at, _)| *at)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
