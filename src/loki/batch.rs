//! Size- and time-bounded batch assembly.

use std::collections::BTreeMap;
use std::time::{Duration, Instant, SystemTime};

use crate::level::LogLevel;

use super::push::QueuedEntry;

/// A non-empty, ordered group of entries delivered in one push request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch {
    entries: Vec<QueuedEntry>,
    assembled_at: SystemTime,
}

impl Batch {
    /// Wrap `entries`; returns `None` when there is nothing to send.
    pub fn new(entries: Vec<QueuedEntry>) -> Option<Self> {
        if entries.is_empty() {
            return None;
        }
        Some(Self {
            entries,
            assembled_at: SystemTime::now(),
        })
    }

    pub fn entries(&self) -> &[QueuedEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always `false`; present for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn assembled_at(&self) -> SystemTime {
        self.assembled_at
    }

    /// Entry counts grouped by `(level, logger)`, as reported to metrics.
    pub fn label_counts(&self) -> BTreeMap<(LogLevel, &str), u64> {
        let mut counts = BTreeMap::new();
        for entry in &self.entries {
            *counts
                .entry((entry.level, entry.logger.as_str()))
                .or_default() += 1;
        }
        counts
    }

    pub fn into_entries(self) -> Vec<QueuedEntry> {
        self.entries
    }
}

/// Accumulates entries until `max_size` is reached or `max_wait` has
/// elapsed since the first pending entry.
#[derive(Debug)]
pub struct BatchAssembler {
    pending: Vec<QueuedEntry>,
    first_at: Option<Instant>,
    max_size: usize,
    max_wait: Duration,
}

impl BatchAssembler {
    /// `max_size` is clamped to at least one.
    pub fn new(max_size: usize, max_wait: Duration) -> Self {
        let max_size = max_size.max(1);
        Self {
            pending: Vec::with_capacity(max_size),
            first_at: None,
            max_size,
            max_wait,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Add an entry, returning the closed batch once it is full.
    pub fn push(&mut self, entry: QueuedEntry) -> Option<Batch> {
        self.push_at(entry, Instant::now())
    }

    pub(crate) fn push_at(&mut self, entry: QueuedEntry, now: Instant) -> Option<Batch> {
        if self.pending.is_empty() {
            self.first_at = Some(now);
        }
        self.pending.push(entry);
        if self.pending.len() >= self.max_size {
            self.take()
        } else {
            None
        }
    }

    /// Instant at which the pending group must be closed, if any is pending.
    pub fn deadline(&self) -> Option<Instant> {
        self.first_at.map(|first| first + self.max_wait)
    }

    /// Time left before the pending group is due.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Close the pending group when its wait has elapsed.
    pub fn take_if_due(&mut self, now: Instant) -> Option<Batch> {
        match self.deadline() {
            Some(deadline) if deadline <= now => self.take(),
            _ => None,
        }
    }

    /// Close whatever is pending, regardless of age.
    pub fn take(&mut self) -> Option<Batch> {
        self.first_at = None;
        let entries = std::mem::replace(&mut self.pending, Vec::with_capacity(self.max_size));
        Batch::new(entries)
    }
}
