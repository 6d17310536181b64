use super::error::{LaunchError, TerminateFailure};
use super::process::{WorkerLauncher, WorkerProcess};
use super::types::{LaunchSpec, ProcessStatus, Snapshot, WorkerId, WorkerState};
use crate::runtime::telemetry::Telemetry;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;
use tokio::time::timeout;

/// Read-only view of a worker for presentation code.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkerView {
    pub id: WorkerId,
    pub state: WorkerState,
    pub started: bool,
    pub visible: bool,
    pub error_flagged: bool,
    pub last_snapshot: Option<Snapshot>,
}

/// Owns one external worker process for the lifetime of a pool.
///
/// `state` only moves forward (see [`WorkerState`]). The only transition a
/// caller can trigger is `Running -> StopRequested`; every other one follows
/// the process's own lifecycle.
pub struct WorkerHandle {
    id: WorkerId,
    process: OnceLock<Arc<dyn WorkerProcess>>,
    state: AtomicU8,
    started: AtomicBool,
    visible: AtomicBool,
    error_flagged: AtomicBool,
    last_snapshot: Mutex<Option<Snapshot>>,
    poll_timeout: Duration,
    telemetry: Arc<Telemetry>,
}

impl WorkerHandle {
    pub fn new(id: WorkerId, poll_timeout: Duration, telemetry: Arc<Telemetry>) -> Self {
        Self {
            id,
            process: OnceLock::new(),
            state: AtomicU8::new(WorkerState::NotStarted as u8),
            started: AtomicBool::new(false),
            visible: AtomicBool::new(false),
            error_flagged: AtomicBool::new(false),
            last_snapshot: Mutex::new(None),
            poll_timeout,
            telemetry,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.get().and_then(|process| process.pid())
    }

    /// Launches the worker process. Starting a handle twice is a no-op.
    pub async fn start(
        &self,
        launcher: &dyn WorkerLauncher,
        ram_share_mb: f64,
        start_minimized: bool,
    ) -> Result<(), LaunchError> {
        if self
            .state
            .compare_exchange(
                WorkerState::NotStarted as u8,
                WorkerState::Starting as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Ok(());
        }

        let spec = LaunchSpec {
            worker: self.id,
            ram_share_mb,
            start_minimized,
        };
        match launcher.launch(spec).await {
            Ok(process) => {
                let process: Arc<dyn WorkerProcess> = Arc::from(process);
                let _ = self.process.set(process);
                self.started.store(true, Ordering::SeqCst);
                self.visible.store(!start_minimized, Ordering::SeqCst);
                self.advance(WorkerState::Running);
                tracing::info!(
                    worker = self.id,
                    pid = ?self.pid(),
                    ram_share_mb,
                    "worker started"
                );
                Ok(())
            }
            Err(err) => {
                self.advance(WorkerState::Finished);
                tracing::error!(worker = self.id, error = %err, "worker failed to start");
                Err(err)
            }
        }
    }

    /// Asks a running worker to stop gracefully. Does nothing for workers that
    /// never started or are already stopping.
    pub async fn request_stop(&self) {
        self.sync_with_process();
        if self
            .state
            .compare_exchange(
                WorkerState::Running as u8,
                WorkerState::StopRequested as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return;
        }

        let Some(process) = self.process.get() else {
            return;
        };
        self.telemetry.record_stop_request();
        tracing::info!(worker = self.id, "requesting worker stop");
        if let Err(err) = process.request_stop().await {
            tracing::warn!(worker = self.id, error = %err, "failed to deliver stop request");
        }
    }

    /// Kills the worker process regardless of its cooperative state.
    ///
    /// A failed kill leaves the state untouched; the handle only finishes once
    /// the process is actually gone.
    pub async fn force_terminate(&self) -> Result<(), TerminateFailure> {
        let Some(process) = self.process.get() else {
            return Ok(());
        };
        if self.state().is_finished() {
            return Ok(());
        }

        match process.kill().await {
            Ok(()) => {
                self.advance(WorkerState::Finished);
                Ok(())
            }
            Err(failure) => {
                self.telemetry.record_terminate_failure();
                tracing::warn!(worker = self.id, error = %failure, "failed to terminate worker");
                Err(failure)
            }
        }
    }

    /// Reads the worker's current counters without waiting longer than the
    /// poll timeout.
    ///
    /// Returns `None` while the worker has not reported yet or does not answer
    /// in time. A finished worker keeps reporting its last known counters, or
    /// zeros if it never reported any.
    pub async fn poll_snapshot(&self) -> Option<Snapshot> {
        let process = self.process.get()?;

        match timeout(self.poll_timeout, process.sample()).await {
            Ok(Some(snapshot)) => {
                *self.lock_last_snapshot() = Some(snapshot);
                Some(snapshot)
            }
            Ok(None) | Err(_) if self.state().is_finished() => {
                Some(self.last_snapshot().unwrap_or_default())
            }
            Ok(None) => {
                tracing::trace!(worker = self.id, "worker has no counters yet");
                None
            }
            Err(_) => {
                self.telemetry.record_unresponsive_poll();
                tracing::debug!(
                    worker = self.id,
                    timeout_ms = self.poll_timeout.as_millis() as u64,
                    "worker did not answer snapshot poll in time"
                );
                None
            }
        }
    }

    pub fn state(&self) -> WorkerState {
        self.sync_with_process();
        WorkerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_stopping(&self) -> bool {
        self.state().is_stopping()
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_finished()
    }

    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::SeqCst);
        if let Some(process) = self.process.get() {
            process.set_visible(visible);
        }
    }

    pub fn error_flagged(&self) -> bool {
        self.error_flagged.load(Ordering::SeqCst)
    }

    pub(crate) fn set_error_flag(&self, flagged: bool) {
        if self.error_flagged.swap(flagged, Ordering::SeqCst) != flagged && flagged {
            tracing::warn!(worker = self.id, "worker reported errors");
        }
    }

    pub fn last_snapshot(&self) -> Option<Snapshot> {
        *self.lock_last_snapshot()
    }

    pub fn view(&self) -> WorkerView {
        WorkerView {
            id: self.id,
            state: self.state(),
            started: self.started(),
            visible: self.visible(),
            error_flagged: self.error_flagged(),
            last_snapshot: self.last_snapshot(),
        }
    }

    fn lock_last_snapshot(&self) -> std::sync::MutexGuard<'_, Option<Snapshot>> {
        self.last_snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn sync_with_process(&self) {
        let Some(process) = self.process.get() else {
            return;
        };
        match process.status() {
            ProcessStatus::Exited => {
                if self.advance(WorkerState::Finished) {
                    tracing::info!(worker = self.id, "worker process exited");
                }
            }
            ProcessStatus::ShuttingDown => {
                self.advance(WorkerState::Stopping);
            }
            ProcessStatus::Initializing | ProcessStatus::Running => {}
        }
    }

    /// Moves the state forward to `next`; returns whether anything changed.
    fn advance(&self, next: WorkerState) -> bool {
        let previous = self.state.fetch_max(next as u8, Ordering::SeqCst);
        let changed = previous < next as u8;
        if changed {
            tracing::debug!(
                worker = self.id,
                from = %WorkerState::from_u8(previous),
                to = %next,
                "worker state changed"
            );
        }
        changed
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("state", &WorkerState::from_u8(self.state.load(Ordering::SeqCst)))
            .field("started", &self.started())
            .field("pid", &self.pid())
            .finish()
    }
}
