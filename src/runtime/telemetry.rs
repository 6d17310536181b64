use crate::runtime::record::AggregateStore;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Rolling counters describing how the supervisor loop is behaving.
#[derive(Default, Debug)]
pub struct Telemetry {
    ticks_published: AtomicU64,
    ticks_skipped: AtomicU64,
    unresponsive_polls: AtomicU64,
    stop_requests: AtomicU64,
    halts: AtomicU64,
    terminate_failures: AtomicU64,
    workers_running: AtomicUsize,
}

impl Telemetry {
    pub fn record_tick_published(&self) {
        self.ticks_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tick_skipped(&self) {
        self.ticks_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unresponsive_poll(&self) {
        self.unresponsive_polls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stop_request(&self) {
        self.stop_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_halt(&self) {
        self.halts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_terminate_failure(&self) {
        self.terminate_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_workers_running(&self, workers: usize) {
        self.workers_running.store(workers, Ordering::Relaxed);
    }

    pub fn workers_running(&self) -> usize {
        self.workers_running.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            ticks_published: self.ticks_published.load(Ordering::Relaxed),
            ticks_skipped: self.ticks_skipped.load(Ordering::Relaxed),
            unresponsive_polls: self.unresponsive_polls.load(Ordering::Relaxed),
            stop_requests: self.stop_requests.load(Ordering::Relaxed),
            halts: self.halts.load(Ordering::Relaxed),
            terminate_failures: self.terminate_failures.load(Ordering::Relaxed),
            workers_running: self.workers_running.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct TelemetrySnapshot {
    pub ticks_published: u64,
    pub ticks_skipped: u64,
    pub unresponsive_polls: u64,
    pub stop_requests: u64,
    pub halts: u64,
    pub terminate_failures: u64,
    pub workers_running: usize,
}

/// Spawns a background task that periodically logs the latest aggregate and loop counters.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    store: Arc<AggregateStore>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "stresspool::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let counters = telemetry.snapshot();
                    let aggregate = store.latest();

                    tracing::info!(
                        target: "stresspool::metrics",
                        total_coverage = format!("{:.2}", aggregate.total_coverage()),
                        total_errors = aggregate.total_errors(),
                        version = aggregate.version(),
                        workers_running = counters.workers_running,
                        ticks_published = counters.ticks_published,
                        ticks_skipped = counters.ticks_skipped,
                        unresponsive_polls = counters.unresponsive_polls,
                        stop_requests = counters.stop_requests,
                        halts = counters.halts,
                        terminate_failures = counters.terminate_failures,
                        "supervisor metrics snapshot"
                    );
                }
            }
        }
    })
}
