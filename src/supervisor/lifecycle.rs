//! Lifecycle orchestration for one supervised run.

use super::aggregator::{Aggregator, StopReport};
use super::clock::SessionClock;
use super::worker_pool::WorkerPool;
use crate::runtime::halt::{HaltHandle, HaltReason};
use crate::runtime::record::AggregateStore;
use crate::runtime::telemetry::{self, Telemetry};
use futures::FutureExt;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub(crate) struct LifecycleHandles {
    aggregator_handle: Option<JoinHandle<()>>,
    clock_handle: Option<JoinHandle<()>>,
    metrics_handle: Option<JoinHandle<()>>,
}

pub(crate) struct LifecycleSpawnParams {
    pub aggregator: Aggregator,
    pub pool: Arc<WorkerPool>,
    pub clock: SessionClock,
    pub halt: HaltHandle,
    pub store: Arc<AggregateStore>,
    pub telemetry: Arc<Telemetry>,
    pub started_at: Instant,
    pub total_ram_mb: f64,
    pub poll_interval: Duration,
    pub drain_interval: Duration,
    pub clock_interval: Duration,
    pub metrics_interval: Duration,
    pub stopped_tx: watch::Sender<Option<StopReport>>,
}

impl LifecycleHandles {
    /// Spawns the aggregator, session clock and metrics reporter for a run.
    ///
    /// All three observe the halt's run token. The aggregator task always
    /// publishes a [`StopReport`] on `stopped_tx` when it ends, panics included;
    /// after a panic the pool's workers are killed first, since the drain never ran.
    pub(crate) fn spawn(params: LifecycleSpawnParams) -> Self {
        let LifecycleSpawnParams {
            aggregator,
            pool,
            clock,
            halt,
            store,
            telemetry,
            started_at,
            total_ram_mb,
            poll_interval,
            drain_interval,
            clock_interval,
            metrics_interval,
            stopped_tx,
        } = params;

        let run_token = halt.run_token();
        let metrics_handle = telemetry::spawn_metrics_reporter(
            telemetry,
            store.clone(),
            run_token.clone(),
            metrics_interval,
        );
        let clock_handle = clock.spawn(clock_interval, run_token.clone());

        let aggregator_handle = tokio::spawn(async move {
            let result = std::panic::AssertUnwindSafe(aggregator.run(
                poll_interval,
                drain_interval,
                run_token.clone(),
            ))
            .catch_unwind()
            .await;

            if let Err(panic_payload) = result {
                let panic_msg = panic_message(panic_payload.as_ref());
                tracing::error!(panic = %panic_msg, "aggregator task panicked; killing workers");
                run_token.cancel();
                let report = pool.terminate_all().await;
                if !report.is_clean() {
                    tracing::warn!(
                        failures = report.failures.len(),
                        "some workers could not be terminated after aggregator panic"
                    );
                }
            }

            let reason = halt.reason().unwrap_or(HaltReason::Manual);
            let report =
                StopReport::new(reason, store.latest(), started_at.elapsed(), total_ram_mb);
            tracing::info!(
                reason = %report.reason,
                total_coverage = report.aggregate.total_coverage(),
                total_errors = report.aggregate.total_errors(),
                elapsed_s = report.elapsed.as_secs_f64(),
                throughput_mb_s = ?report.throughput_mb_s,
                "worker pool stopped"
            );
            stopped_tx.send_replace(Some(report));
        });

        Self {
            aggregator_handle: Some(aggregator_handle),
            clock_handle: Some(clock_handle),
            metrics_handle: Some(metrics_handle),
        }
    }

    pub(crate) async fn shutdown(mut self) {
        if let Some(handle) = self.aggregator_handle.take() {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "aggregator task failed to join");
            }
        }

        if let Some(handle) = self.clock_handle.take() {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "session clock task panicked");
            }
        }

        if let Some(handle) = self.metrics_handle.take() {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "metrics reporter task panicked");
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
