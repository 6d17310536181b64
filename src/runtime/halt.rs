use crate::runtime::telemetry::Telemetry;
use crate::worker::WorkerId;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

/// Why a pool was stopped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HaltReason {
    /// The caller asked for the pool to stop.
    Manual,
    /// Total coverage passed the pool-wide stop threshold.
    PoolThreshold { total_coverage: f64, threshold: u32 },
    /// A worker reported errors while stop-on-error was enabled.
    WorkerError { worker: WorkerId, errors: u64 },
    /// Every worker reached `Finished`.
    AllFinished,
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaltReason::Manual => write!(f, "stopped by request"),
            HaltReason::PoolThreshold {
                total_coverage,
                threshold,
            } => write!(
                f,
                "total coverage {total_coverage:.2}% passed stop threshold {threshold}%"
            ),
            HaltReason::WorkerError { worker, errors } => {
                write!(f, "worker {worker} reported {errors} error(s)")
            }
            HaltReason::AllFinished => write!(f, "all workers finished"),
        }
    }
}

/// The single "stop the whole pool" action shared by every trigger path.
///
/// Only the first trigger has an effect; it records the reason and cancels the
/// run token, which the supervisor tasks treat as the signal to wind down.
#[derive(Clone)]
pub struct HaltHandle {
    inner: Arc<HaltInner>,
}

struct HaltInner {
    triggered: AtomicBool,
    run_shutdown: CancellationToken,
    reason: Mutex<Option<HaltReason>>,
    telemetry: Arc<Telemetry>,
}

impl HaltHandle {
    pub fn new(run_shutdown: CancellationToken, telemetry: Arc<Telemetry>) -> Self {
        Self {
            inner: Arc::new(HaltInner {
                triggered: AtomicBool::new(false),
                run_shutdown,
                reason: Mutex::new(None),
                telemetry,
            }),
        }
    }

    /// Stops the pool. Returns `true` only for the call that actually initiated the halt.
    pub fn trigger(&self, reason: HaltReason) -> bool {
        if self.inner.triggered.swap(true, Ordering::SeqCst) {
            tracing::trace!(%reason, "pool halt already in progress");
            return false;
        }

        {
            let mut slot = self
                .inner
                .reason
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                *slot = Some(reason);
            }
        }

        self.inner.telemetry.record_halt();
        match reason {
            HaltReason::Manual | HaltReason::AllFinished => {
                tracing::info!(%reason, "halting worker pool");
            }
            HaltReason::PoolThreshold { .. } | HaltReason::WorkerError { .. } => {
                tracing::warn!(%reason, "halting worker pool");
            }
        }

        self.inner.run_shutdown.cancel();
        true
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<HaltReason> {
        *self
            .inner
            .reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolves once the pool has been halted, by any path.
    pub async fn triggered(&self) {
        self.inner.run_shutdown.cancelled().await;
    }

    pub fn run_token(&self) -> CancellationToken {
        self.inner.run_shutdown.clone()
    }
}

impl fmt::Debug for HaltHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HaltHandle")
            .field("triggered", &self.is_triggered())
            .field("reason", &self.reason())
            .finish()
    }
}
