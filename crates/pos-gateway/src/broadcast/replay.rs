//! Late-join replay state
//!
//! The latest snapshot per queue and a bounded history of system errors, both
//! sent to a client right after it connects.

use crate::events::{QueueMetricSnapshot, SystemErrorEvent};
use std::collections::VecDeque;

/// Latest snapshot per queue name, in first-seen order
///
/// Never evicts by name; queue names are a small fixed set.
#[derive(Debug, Default)]
pub struct MetricsCache {
    snapshots: Vec<QueueMetricSnapshot>,
}

impl MetricsCache {
    /// Replace the snapshot for its queue, keeping the queue's position
    pub fn upsert(&mut self, snapshot: QueueMetricSnapshot) {
        match self.snapshots.iter_mut().find(|s| s.queue == snapshot.queue) {
            Some(slot) => *slot = snapshot,
            None => self.snapshots.push(snapshot),
        }
    }

    #[cfg(test)]
    fn get(&self, queue: &str) -> Option<&QueueMetricSnapshot> {
        self.snapshots.iter().find(|s| s.queue == queue)
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueMetricSnapshot> {
        self.snapshots.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.snapshots.len()
    }
}

/// Fixed-capacity error history, newest first
#[derive(Debug)]
pub struct ErrorHistory {
    entries: VecDeque<SystemErrorEvent>,
    capacity: usize,
}

impl ErrorHistory {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Prepend an event, returning the entry evicted past capacity
    pub fn push(&mut self, event: SystemErrorEvent) -> Option<SystemErrorEvent> {
        self.entries.push_front(event);
        if self.entries.len() > self.capacity {
            self.entries.pop_back()
        } else {
            None
        }
    }

    /// Newest first
    pub fn newest_first(&self) -> impl Iterator<Item = &SystemErrorEvent> {
        self.entries.iter()
    }

    /// Oldest first, the order the events were reported in
    pub fn oldest_first(&self) -> impl Iterator<Item = &SystemErrorEvent> {
        self.entries.iter().rev()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Everything replayed to a late joiner
///
/// Every recorded update bumps `version`. A connection registered at version
/// `v` has already seen, through its replay, every update numbered `v` or
/// lower.
#[derive(Debug)]
pub struct ReplayCache {
    pub metrics: MetricsCache,
    pub errors: ErrorHistory,
    version: u64,
}

impl ReplayCache {
    #[must_use]
    pub fn new(error_capacity: usize) -> Self {
        Self {
            metrics: MetricsCache::default(),
            errors: ErrorHistory::new(error_capacity),
            version: 0,
        }
    }

    /// Cache a queue snapshot, returning the version of the update
    pub fn record_metrics(&mut self, snapshot: QueueMetricSnapshot) -> u64 {
        self.metrics.upsert(snapshot);
        self.bump()
    }

    /// Add an error to the history, returning the version of the update
    pub fn record_error(&mut self, event: SystemErrorEvent) -> u64 {
        self.errors.push(event);
        self.bump()
    }

    /// Version of the latest update; 0 before any
    pub fn version(&self) -> u64 {
        self.version
    }

    fn bump(&mut self) -> u64 {
        self.version += 1;
        self.version
    }
}
