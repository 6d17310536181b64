//! Periodic poll over the pool: merges snapshots into one record and applies
//! the stop policies.

use super::clock;
use super::policy;
use super::worker_pool::WorkerPool;
use crate::runtime::config::StopConfig;
use crate::runtime::halt::{HaltHandle, HaltReason};
use crate::runtime::record::{AggregateRecord, AggregateStore};
use crate::runtime::telemetry::Telemetry;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Result of one aggregator pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A new record with this version was published.
    Published(u64),
    /// Some worker had no snapshot; the previous record stays current.
    Skipped,
}

/// Final state of a run, emitted once the pool has fully stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct StopReport {
    pub reason: HaltReason,
    pub aggregate: Arc<AggregateRecord>,
    pub elapsed: Duration,
    /// `None` when the run ended before any time elapsed.
    pub throughput_mb_s: Option<f64>,
}

impl StopReport {
    pub(crate) fn new(
        reason: HaltReason,
        aggregate: Arc<AggregateRecord>,
        elapsed: Duration,
        total_ram_mb: f64,
    ) -> Self {
        let throughput_mb_s =
            clock::throughput_mb_s(elapsed, aggregate.total_coverage(), total_ram_mb);
        Self {
            reason,
            aggregate,
            elapsed,
            throughput_mb_s,
        }
    }
}

pub(crate) struct Aggregator {
    pool: Arc<WorkerPool>,
    store: Arc<AggregateStore>,
    stop: StopConfig,
    halt: HaltHandle,
    telemetry: Arc<Telemetry>,
}

impl Aggregator {
    pub(crate) fn new(
        pool: Arc<WorkerPool>,
        store: Arc<AggregateStore>,
        stop: StopConfig,
        halt: HaltHandle,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            pool,
            store,
            stop,
            halt,
            telemetry,
        }
    }

    /// Runs one pass. With `check` unset the pass only refreshes the record,
    /// without stopping anything.
    pub(crate) async fn tick(&self, check: bool) -> TickOutcome {
        let polled = self.pool.poll_all().await;
        self.telemetry
            .record_workers_running(self.pool.running_count());

        let mut snapshots = Vec::with_capacity(polled.len());
        for (worker, snapshot) in polled.into_iter().enumerate() {
            match snapshot {
                Some(snapshot) => snapshots.push(snapshot),
                None => {
                    self.telemetry.record_tick_skipped();
                    tracing::trace!(worker, "worker has no snapshot; skipping tick");
                    return TickOutcome::Skipped;
                }
            }
        }

        if check {
            for (id, snapshot) in snapshots.iter().enumerate() {
                let Some(worker) = self.pool.handle(id) else {
                    continue;
                };

                if policy::should_stop_worker(snapshot, &self.stop) && !worker.is_finished() {
                    if !worker.is_stopping() {
                        tracing::info!(
                            worker = id,
                            coverage = snapshot.coverage,
                            "worker passed its stop threshold"
                        );
                    }
                    worker.request_stop().await;
                }

                if self.stop.stop_on_any_error() {
                    worker.set_error_flag(snapshot.errors > 0);
                    if let Some(reason) = policy::error_halt(id, snapshot, &self.stop) {
                        self.halt.trigger(reason);
                    }
                }
            }
        }

        let record = self.store.publish(AggregateRecord::from_snapshots(
            self.store.next_version(),
            snapshots,
        ));
        self.telemetry.record_tick_published();
        tracing::trace!(
            version = record.version(),
            total_coverage = record.total_coverage(),
            total_errors = record.total_errors(),
            "published aggregate"
        );

        if check {
            if let Some(reason) = policy::should_stop_pool(&record, &self.stop) {
                self.halt.trigger(reason);
            }
            if self.pool.all_finished() {
                self.halt.trigger(HaltReason::AllFinished);
            }
        }

        TickOutcome::Published(record.version())
    }

    /// Ticks every `interval` until `shutdown` fires, then stops every worker,
    /// waits for them to settle and publishes one last unchecked record.
    ///
    /// Cancellation is only observed between ticks.
    pub(crate) async fn run(
        self,
        interval: Duration,
        drain_interval: Duration,
        shutdown: CancellationToken,
    ) {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick(true).await;
                }
            }
        }

        tracing::info!("aggregator stopping workers");
        self.pool.request_stop_all().await;
        self.pool.await_all_stopped(drain_interval).await;
        let outcome = self.tick(false).await;
        let record = self.store.latest();
        tracing::info!(
            ?outcome,
            total_coverage = record.total_coverage(),
            total_errors = record.total_errors(),
            "aggregator finished"
        );
    }
}
