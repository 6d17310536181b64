//! Session clock and rate estimation.
//!
//! Everything here is advisory: no stop decision reads these values.

use crate::runtime::record::AggregateStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::select;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Projection derived from the total coverage reached so far.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    /// Next multiple of 100 at or above the current total coverage.
    pub next_milestone: f64,
    /// Linear extrapolation of the time left until `next_milestone`.
    pub remaining: Duration,
    /// Memory verified per second, in MB/s.
    pub throughput_mb_s: f64,
}

/// What the clock publishes once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SessionStats {
    pub elapsed: Duration,
    pub estimate: Option<Estimate>,
}

/// Rate estimate after `elapsed` time. `None` until there is coverage and time
/// to extrapolate from.
pub fn estimate(elapsed: Duration, total_coverage: f64, total_ram_mb: f64) -> Option<Estimate> {
    if !(total_coverage > 0.0) {
        return None;
    }
    let throughput_mb_s = throughput_mb_s(elapsed, total_coverage, total_ram_mb)?;

    let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
    let next_milestone = (total_coverage / 100.0).ceil() * 100.0;
    let remaining_ms = elapsed_ms / total_coverage * next_milestone - elapsed_ms;
    let remaining = Duration::try_from_secs_f64(remaining_ms.max(0.0) / 1000.0).ok()?;

    Some(Estimate {
        next_milestone,
        remaining,
        throughput_mb_s,
    })
}

/// `(total_coverage / 100) * total_ram_mb / elapsed_seconds`, or `None` before
/// any time has passed.
pub fn throughput_mb_s(elapsed: Duration, total_coverage: f64, total_ram_mb: f64) -> Option<f64> {
    let seconds = elapsed.as_secs_f64();
    if seconds <= 0.0 {
        return None;
    }
    let throughput = (total_coverage / 100.0) * total_ram_mb / seconds;
    throughput.is_finite().then_some(throughput)
}

pub(crate) struct SessionClock {
    started_at: Instant,
    total_ram_mb: f64,
    store: Arc<AggregateStore>,
    stats: watch::Sender<SessionStats>,
}

impl SessionClock {
    pub(crate) fn new(
        started_at: Instant,
        total_ram_mb: f64,
        store: Arc<AggregateStore>,
    ) -> (Self, watch::Receiver<SessionStats>) {
        let (stats, stats_rx) = watch::channel(SessionStats::default());
        (
            Self {
                started_at,
                total_ram_mb,
                store,
                stats,
            },
            stats_rx,
        )
    }

    pub(crate) fn sample(&self) -> SessionStats {
        let elapsed = self.started_at.elapsed();
        let total_coverage = self.store.latest().total_coverage();
        SessionStats {
            elapsed,
            estimate: estimate(elapsed, total_coverage, self.total_ram_mb),
        }
    }

    pub(crate) fn spawn(self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                select! {
                    _ = shutdown.cancelled() => {
                        // one last reading so the final elapsed time is visible
                        self.stats.send_replace(self.sample());
                        tracing::debug!("session clock stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let stats = self.sample();
                        tracing::trace!(
                            elapsed_s = stats.elapsed.as_secs(),
                            estimate = ?stats.estimate,
                            "session clock tick"
                        );
                        self.stats.send_replace(stats);
                    }
                }
            }
        })
    }
}
