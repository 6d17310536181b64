//! Stop conditions, evaluated without side effects.
//!
//! Thresholds use a strict comparison: a worker sitting exactly on its
//! threshold keeps running until the next tick reports more.

use crate::runtime::config::StopConfig;
use crate::runtime::halt::HaltReason;
use crate::runtime::record::AggregateRecord;
use crate::worker::{Snapshot, WorkerId};

/// Whether a single worker has passed its per-worker threshold.
pub fn should_stop_worker(snapshot: &Snapshot, stop: &StopConfig) -> bool {
    match stop.per_worker_stop_at_percent() {
        Some(threshold) => snapshot.coverage > f64::from(threshold),
        None => false,
    }
}

/// Whether the pool as a whole has passed its total-coverage threshold.
pub fn should_stop_pool(record: &AggregateRecord, stop: &StopConfig) -> Option<HaltReason> {
    let threshold = stop.pool_stop_at_percent()?;
    let total_coverage = record.total_coverage();
    (total_coverage > f64::from(threshold)).then_some(HaltReason::PoolThreshold {
        total_coverage,
        threshold,
    })
}

/// Whether a worker's errors halt the pool. Independent of the stop mode.
pub fn error_halt(worker: WorkerId, snapshot: &Snapshot, stop: &StopConfig) -> Option<HaltReason> {
    (stop.stop_on_any_error() && snapshot.errors > 0).then_some(HaltReason::WorkerError {
        worker,
        errors: snapshot.errors,
    })
}
