use crate::worker::{Snapshot, WorkerId};
use std::sync::{Arc, Mutex, PoisonError};

/// Pool-wide totals published by the aggregator once per complete tick.
///
/// Totals are computed from `per_worker` at construction, so every published
/// record is internally consistent.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRecord {
    version: u64,
    per_worker: Vec<Snapshot>,
    total_coverage: f64,
    total_errors: u64,
}

impl AggregateRecord {
    /// Empty record for a pool of `workers`, all counters at zero.
    pub fn empty(workers: usize) -> Self {
        Self::from_snapshots(0, vec![Snapshot::default(); workers])
    }

    /// Builds a record whose totals are the sums over `per_worker`, indexed by worker id.
    pub fn from_snapshots(version: u64, per_worker: Vec<Snapshot>) -> Self {
        let total_coverage = per_worker.iter().map(|snapshot| snapshot.coverage).sum();
        let total_errors = per_worker
            .iter()
            .fold(0u64, |acc, snapshot| acc.saturating_add(snapshot.errors));
        Self {
            version,
            per_worker,
            total_coverage,
            total_errors,
        }
    }

    /// Tick sequence number; `0` before the first complete tick.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn per_worker(&self) -> &[Snapshot] {
        &self.per_worker
    }

    pub fn worker(&self, id: WorkerId) -> Option<Snapshot> {
        self.per_worker.get(id).copied()
    }

    pub fn worker_count(&self) -> usize {
        self.per_worker.len()
    }

    /// Sum of every worker's coverage. Workers cover disjoint slices of the
    /// budget, so the sum is the coverage of the whole budget.
    pub fn total_coverage(&self) -> f64 {
        self.total_coverage
    }

    pub fn total_errors(&self) -> u64 {
        self.total_errors
    }
}

/// Holds the latest [`AggregateRecord`] for one run.
///
/// Writers swap in a whole new record under the lock and readers clone the
/// `Arc`, so nobody can observe totals from two different ticks.
#[derive(Debug)]
pub struct AggregateStore {
    current: Mutex<Arc<AggregateRecord>>,
}

impl AggregateStore {
    pub fn new(workers: usize) -> Self {
        Self {
            current: Mutex::new(Arc::new(AggregateRecord::empty(workers))),
        }
    }

    pub fn latest(&self) -> Arc<AggregateRecord> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the current record and hands back the shared copy readers will see.
    pub fn publish(&self, record: AggregateRecord) -> Arc<AggregateRecord> {
        let record = Arc::new(record);
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = record.clone();
        record
    }

    /// Sequence number of the next tick.
    pub fn next_version(&self) -> u64 {
        self.latest().version().saturating_add(1)
    }
}
