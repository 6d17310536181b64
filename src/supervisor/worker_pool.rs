//! Worker pool orchestration for [`Supervisor`](super::Supervisor).
//!
//! This module owns handle creation, the all-or-nothing start, stop fan-out,
//! and the pool-wide predicates the aggregator relies on.

use crate::runtime::telemetry::Telemetry;
use crate::worker::{
    LaunchError, Snapshot, TerminateReport, WorkerHandle, WorkerId, WorkerLauncher, WorkerView,
};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

pub struct WorkerPool {
    launcher: Arc<dyn WorkerLauncher>,
    workers: Vec<WorkerHandle>,
    max_workers: usize,
    poll_timeout: Duration,
    telemetry: Arc<Telemetry>,
}

pub struct WorkerPoolParams {
    pub launcher: Arc<dyn WorkerLauncher>,
    /// Largest pool `start_all` accepts.
    pub max_workers: usize,
    pub poll_timeout: Duration,
    pub telemetry: Arc<Telemetry>,
}

impl WorkerPool {
    pub fn new(params: WorkerPoolParams) -> Self {
        Self {
            launcher: params.launcher,
            workers: Vec::new(),
            max_workers: params.max_workers,
            poll_timeout: params.poll_timeout,
            telemetry: params.telemetry,
        }
    }

    /// Launches `count` workers in parallel, each with an even share of
    /// `total_ram_mb`.
    ///
    /// Either every worker starts or none is left running: on the first failure
    /// the workers that did start are killed and the error of the lowest failing
    /// worker id is returned.
    pub async fn start_all(
        &mut self,
        count: usize,
        total_ram_mb: f64,
        start_minimized: bool,
    ) -> Result<(), LaunchError> {
        if !self.workers.is_empty() {
            return Err(LaunchError::AlreadyRunning);
        }
        if count > self.max_workers {
            return Err(LaunchError::PoolTooLarge {
                requested: count,
                max: self.max_workers,
            });
        }

        let ram_share_mb = if count == 0 {
            0.0
        } else {
            total_ram_mb / count as f64
        };
        tracing::info!(
            workers = count,
            total_ram_mb,
            ram_share_mb,
            start_minimized,
            "starting worker pool"
        );

        let workers: Vec<WorkerHandle> = (0..count)
            .map(|id| WorkerHandle::new(id, self.poll_timeout, self.telemetry.clone()))
            .collect();
        let launcher = self.launcher.as_ref();
        let results = join_all(
            workers
                .iter()
                .map(|worker| worker.start(launcher, ram_share_mb, start_minimized)),
        )
        .await;

        if let Some(err) = results.into_iter().find_map(Result::err) {
            tracing::error!(error = %err, "worker pool start failed; terminating started workers");
            let report = terminate_handles(&workers).await;
            let still_running = live_count(&workers);
            if !report.is_clean() {
                tracing::warn!(
                    failures = report.failures.len(),
                    still_running,
                    "some workers could not be terminated during rollback"
                );
            }
            self.telemetry.record_workers_running(still_running);
            return Err(err);
        }

        self.workers = workers;
        self.telemetry.record_workers_running(self.running_count());
        Ok(())
    }

    /// Sends a stop request to every worker at once. Does not wait for the
    /// workers to actually finish.
    pub async fn request_stop_all(&self) {
        join_all(self.workers.iter().map(WorkerHandle::request_stop)).await;
    }

    /// Waits until no worker reports `StopRequested` or `Stopping`.
    ///
    /// There is no upper bound: a worker that never leaves `Stopping` stalls
    /// this call.
    pub async fn await_all_stopped(&self, interval: Duration) {
        loop {
            let stopping = self
                .workers
                .iter()
                .filter(|worker| worker.is_stopping())
                .count();
            if stopping == 0 {
                break;
            }
            tracing::trace!(stopping, "waiting for workers to stop");
            sleep(interval).await;
        }
    }

    /// Kills every host process of the launcher's executable kind, including
    /// ones this pool never started.
    pub async fn terminate_all_of_kind(&self) -> TerminateReport {
        terminate_all_of_kind(self.launcher.as_ref(), &self.telemetry).await
    }

    /// Kills exactly the workers owned by this pool.
    pub async fn terminate_all(&self) -> TerminateReport {
        let report = terminate_handles(&self.workers).await;
        self.telemetry.record_workers_running(self.running_count());
        report
    }

    /// Polls every worker concurrently, so the whole pass is bounded by the
    /// per-worker poll timeout.
    pub async fn poll_all(&self) -> Vec<Option<Snapshot>> {
        join_all(self.workers.iter().map(WorkerHandle::poll_snapshot)).await
    }

    pub fn any_stopping(&self) -> bool {
        self.workers.iter().any(WorkerHandle::is_stopping)
    }

    pub fn all_finished(&self) -> bool {
        self.workers.iter().all(WorkerHandle::is_finished)
    }

    /// Workers that were launched and have not finished yet.
    pub fn running_count(&self) -> usize {
        live_count(&self.workers)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn handle(&self, id: WorkerId) -> Option<&WorkerHandle> {
        self.workers.get(id)
    }

    pub fn handles(&self) -> &[WorkerHandle] {
        &self.workers
    }

    pub fn views(&self) -> Vec<WorkerView> {
        self.workers.iter().map(WorkerHandle::view).collect()
    }

    pub fn show_all(&self) {
        for worker in &self.workers {
            worker.set_visible(true);
        }
    }

    pub fn hide_all(&self) {
        for worker in &self.workers {
            worker.set_visible(false);
        }
    }

    /// Returns `false` when `id` is not part of the pool.
    pub fn set_visible(&self, id: WorkerId, visible: bool) -> bool {
        match self.workers.get(id) {
            Some(worker) => {
                worker.set_visible(visible);
                true
            }
            None => false,
        }
    }
}

pub(crate) async fn terminate_all_of_kind(
    launcher: &dyn WorkerLauncher,
    telemetry: &Telemetry,
) -> TerminateReport {
    let report = launcher.terminate_all_of_kind().await;
    for failure in &report.failures {
        telemetry.record_terminate_failure();
        tracing::warn!(error = %failure, "failed to terminate stray worker");
    }
    tracing::info!(
        executable = launcher.executable_name(),
        terminated = report.terminated,
        failures = report.failures.len(),
        "terminated workers of kind"
    );
    report
}

fn is_live(worker: &WorkerHandle) -> bool {
    worker.started() && !worker.is_finished()
}

fn live_count(workers: &[WorkerHandle]) -> usize {
    workers.iter().filter(|worker| is_live(worker)).count()
}

async fn terminate_handles(workers: &[WorkerHandle]) -> TerminateReport {
    let live: Vec<&WorkerHandle> = workers.iter().filter(|worker| is_live(worker)).collect();
    let results = join_all(live.iter().map(|worker| worker.force_terminate())).await;

    let mut report = TerminateReport::default();
    for result in results {
        match result {
            Ok(()) => report.terminated += 1,
            Err(failure) => report.failures.push(failure),
        }
    }
    report
}
