//! `Supervisor` owns one pool run at a time: it starts the workers, spawns the
//! run-scoped tasks from `lifecycle`, and exposes the read-only views and the
//! stop controls the presentation layer needs.

use super::aggregator::{Aggregator, StopReport};
use super::clock::{SessionClock, SessionStats};
use super::lifecycle::{LifecycleHandles, LifecycleSpawnParams};
use super::worker_pool::{self, WorkerPool, WorkerPoolParams};
use crate::runtime::config::SupervisorConfig;
use crate::runtime::halt::{HaltHandle, HaltReason};
use crate::runtime::record::{AggregateRecord, AggregateStore};
use crate::runtime::telemetry::Telemetry;
use crate::worker::{LaunchError, TerminateReport, WorkerId, WorkerLauncher, WorkerView};
use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub struct Supervisor {
    config: SupervisorConfig,
    launcher: Arc<dyn WorkerLauncher>,
    shutdown_root: CancellationToken,
    telemetry: Arc<Telemetry>,
    run: Option<ActiveRun>,
}

struct ActiveRun {
    pool: Arc<WorkerPool>,
    store: Arc<AggregateStore>,
    halt: HaltHandle,
    stats_rx: watch::Receiver<SessionStats>,
    stopped_rx: watch::Receiver<Option<StopReport>>,
    lifecycle: Option<LifecycleHandles>,
}

impl ActiveRun {
    fn has_stopped(&self) -> bool {
        self.stopped_rx.borrow().is_some()
    }
}

impl Supervisor {
    /// Creates a supervisor with its own root cancellation token.
    pub fn new(config: SupervisorConfig, launcher: impl WorkerLauncher) -> Self {
        Self::with_cancellation_token(config, Arc::new(launcher), CancellationToken::new())
    }

    /// Creates a supervisor whose runs are children of `shutdown_token`:
    /// cancelling it stops the current run like a manual stop.
    pub fn with_cancellation_token(
        config: SupervisorConfig,
        launcher: Arc<dyn WorkerLauncher>,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            config,
            launcher,
            shutdown_root: shutdown_token,
            telemetry: Arc::new(Telemetry::default()),
            run: None,
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    /// Replaces the root shutdown token. Only valid between runs.
    pub fn replace_shutdown_root(&mut self, shutdown: CancellationToken) {
        debug_assert!(
            !self.is_running(),
            "shutdown token should not change while a pool is running"
        );
        self.shutdown_root = shutdown;
    }

    /// Starts a new pool run.
    ///
    /// A previous run that already stopped on its own is reaped first; a run
    /// that is still active yields [`LaunchError::AlreadyRunning`].
    pub async fn start(&mut self) -> Result<(), LaunchError> {
        if let Some(run) = &self.run {
            if !run.has_stopped() {
                return Err(LaunchError::AlreadyRunning);
            }
            if let Err(err) = self.finish_run().await {
                tracing::warn!(error = %err, "failed to reap previous run");
            }
        }

        debug_assert!(
            self.config.validate().is_ok(),
            "SupervisorConfig should have been validated at construction time"
        );

        let worker_count = self.config.worker_count();
        if self.config.terminate_orphans_on_start() {
            worker_pool::terminate_all_of_kind(self.launcher.as_ref(), &self.telemetry).await;
        }

        let mut pool = WorkerPool::new(WorkerPoolParams {
            launcher: self.launcher.clone(),
            max_workers: self.config.max_workers(),
            poll_timeout: self.config.poll_timeout(),
            telemetry: self.telemetry.clone(),
        });
        pool.start_all(
            worker_count,
            self.config.total_ram_mb(),
            self.config.start_minimized(),
        )
        .await?;
        let pool = Arc::new(pool);

        let started_at = Instant::now();
        let store = Arc::new(AggregateStore::new(worker_count));
        let halt = HaltHandle::new(self.shutdown_root.child_token(), self.telemetry.clone());
        let aggregator = Aggregator::new(
            pool.clone(),
            store.clone(),
            self.config.stop(),
            halt.clone(),
            self.telemetry.clone(),
        );
        let (clock, stats_rx) =
            SessionClock::new(started_at, self.config.total_ram_mb(), store.clone());
        let (stopped_tx, stopped_rx) = watch::channel(None);

        let lifecycle = LifecycleHandles::spawn(LifecycleSpawnParams {
            aggregator,
            pool: pool.clone(),
            clock,
            halt: halt.clone(),
            store: store.clone(),
            telemetry: self.telemetry.clone(),
            started_at,
            total_ram_mb: self.config.total_ram_mb(),
            poll_interval: self.config.poll_interval(),
            drain_interval: self.config.drain_interval(),
            clock_interval: self.config.clock_interval(),
            metrics_interval: self.config.metrics_interval(),
            stopped_tx,
        });

        tracing::info!(
            workers = worker_count,
            total_ram_mb = self.config.total_ram_mb(),
            stop = ?self.config.stop(),
            "worker pool running"
        );

        self.run = Some(ActiveRun {
            pool,
            store,
            halt,
            stats_rx,
            stopped_rx,
            lifecycle: Some(lifecycle),
        });
        Ok(())
    }

    /// Stops the pool and waits until it has fully stopped.
    ///
    /// Workers are asked to stop gracefully and the call only returns once
    /// none of them is still stopping, so it can take as long as the slowest
    /// worker needs.
    pub async fn stop(&mut self) -> Result<StopReport> {
        let Some(run) = &self.run else {
            bail!("worker pool is not running");
        };
        run.halt.trigger(HaltReason::Manual);
        self.finish_run().await
    }

    /// Kills the workers this supervisor started, then stops the run.
    ///
    /// Returns `None` when no run was active.
    pub async fn shutdown(&mut self) -> Result<Option<StopReport>> {
        let Some(run) = &self.run else {
            return Ok(None);
        };
        let report = run.pool.terminate_all().await;
        if !report.is_clean() {
            tracing::warn!(
                failures = report.failures.len(),
                "some workers could not be terminated"
            );
        }
        run.halt.trigger(HaltReason::Manual);
        self.finish_run().await.map(Some)
    }

    /// Waits until the current run stops, without asking it to.
    pub async fn wait_stopped(&self) -> Result<StopReport> {
        let mut stopped_rx = self
            .subscribe_stopped()
            .context("worker pool is not running")?;
        wait_for_report(&mut stopped_rx).await
    }

    /// "Pool fully stopped" notifications for the current run. The value turns
    /// `Some` exactly once.
    pub fn subscribe_stopped(&self) -> Option<watch::Receiver<Option<StopReport>>> {
        self.run.as_ref().map(|run| run.stopped_rx.clone())
    }

    /// Whether a run is active and has not stopped yet.
    pub fn is_running(&self) -> bool {
        self.run.as_ref().is_some_and(|run| !run.has_stopped())
    }

    pub fn halt_reason(&self) -> Option<HaltReason> {
        self.run.as_ref().and_then(|run| run.halt.reason())
    }

    /// Latest published aggregate for the current run.
    pub fn aggregate(&self) -> Option<Arc<AggregateRecord>> {
        self.run.as_ref().map(|run| run.store.latest())
    }

    pub fn worker_views(&self) -> Vec<WorkerView> {
        self.run
            .as_ref()
            .map(|run| run.pool.views())
            .unwrap_or_default()
    }

    pub fn session_stats(&self) -> Option<SessionStats> {
        self.run.as_ref().map(|run| *run.stats_rx.borrow())
    }

    pub fn show_all(&self) {
        if let Some(run) = &self.run {
            run.pool.show_all();
        }
    }

    pub fn hide_all(&self) {
        if let Some(run) = &self.run {
            run.pool.hide_all();
        }
    }

    /// Returns `false` when there is no run or no such worker.
    pub fn set_visible(&self, id: WorkerId, visible: bool) -> bool {
        self.run
            .as_ref()
            .is_some_and(|run| run.pool.set_visible(id, visible))
    }

    /// Kills every host process of the launcher's executable kind, whether or
    /// not this supervisor started it.
    pub async fn terminate_all_of_kind(&self) -> TerminateReport {
        worker_pool::terminate_all_of_kind(self.launcher.as_ref(), &self.telemetry).await
    }

    async fn finish_run(&mut self) -> Result<StopReport> {
        let Some(mut run) = self.run.take() else {
            bail!("worker pool is not running");
        };
        let report = wait_for_report(&mut run.stopped_rx).await;
        if let Some(lifecycle) = run.lifecycle.take() {
            lifecycle.shutdown().await;
        }
        self.telemetry
            .record_workers_running(run.pool.running_count());
        report
    }
}

async fn wait_for_report(
    stopped_rx: &mut watch::Receiver<Option<StopReport>>,
) -> Result<StopReport> {
    let report = stopped_rx
        .wait_for(Option::is_some)
        .await
        .context("aggregator exited without reporting a stop")?
        .clone();
    report.context("aggregator exited without reporting a stop")
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("workers", &self.config.worker_count())
            .field("running", &self.is_running())
            .field("halt_reason", &self.halt_reason())
            .finish()
    }
}
