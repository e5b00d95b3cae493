//! In-process, append-only record of assignments made during a run

use crate::data::RawObservation;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// One assignment: the observation as received and the label it was given
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub observation: RawObservation,
    pub label: usize,
}

#[derive(Debug, Default)]
struct LedgerState {
    records: VecDeque<AssignmentRecord>,
    capacity: Option<NonZeroUsize>,
    evicted: u64,
}

/// Thread-safe assignment ledger
///
/// Cloning yields another handle to the same ledger. Each append takes the
/// write lock for a single push, so a snapshot never sees a partial record.
/// Unbounded by default; a bounded ledger keeps the most recent `capacity`
/// records. [`Ledger::clear`] is the explicit reset.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    inner: Arc<RwLock<LedgerState>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger retaining at most `capacity` records, evicting the oldest first
    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(LedgerState {
                records: VecDeque::with_capacity(capacity.get().min(4096)),
                capacity: Some(capacity),
                evicted: 0,
            })),
        }
    }

    pub fn append(&self, record: AssignmentRecord) {
        let mut state = self.inner.write();
        if let Some(capacity) = state.capacity {
            while state.records.len() >= capacity.get() {
                state.records.pop_front();
                state.evicted += 1;
            }
        }
        state.records.push_back(record);
    }

    /// Consistent copy of every retained record, oldest first
    pub fn snapshot(&self) -> Vec<AssignmentRecord> {
        self.inner.read().records.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().records.is_empty()
    }

    pub fn capacity(&self) -> Option<NonZeroUsize> {
        self.inner.read().capacity
    }

    /// Records dropped by the retention bound since the last clear
    pub fn evicted(&self) -> u64 {
        self.inner.read().evicted
    }

    /// Drop every record
    pub fn clear(&self) {
        let mut state = self.inner.write();
        state.records.clear();
        state.evicted = 0;
    }
}
