use std::fmt;

/// Slot index of a worker inside a pool, in `0..worker_count`.
pub type WorkerId = usize;

/// Lifecycle of a single worker as observed by the supervisor.
///
/// Variants are declared in lifecycle order; a handle only ever moves to a
/// variant that compares greater than its current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum WorkerState {
    NotStarted = 0,
    Starting = 1,
    Running = 2,
    StopRequested = 3,
    Stopping = 4,
    Finished = 5,
}

impl WorkerState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::NotStarted,
            1 => WorkerState::Starting,
            2 => WorkerState::Running,
            3 => WorkerState::StopRequested,
            4 => WorkerState::Stopping,
            _ => WorkerState::Finished,
        }
    }

    pub fn is_stopping(self) -> bool {
        matches!(self, WorkerState::StopRequested | WorkerState::Stopping)
    }

    pub fn is_finished(self) -> bool {
        self == WorkerState::Finished
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WorkerState::NotStarted => "not started",
            WorkerState::Starting => "starting",
            WorkerState::Running => "running",
            WorkerState::StopRequested => "stop requested",
            WorkerState::Stopping => "stopping",
            WorkerState::Finished => "finished",
        };
        f.write_str(label)
    }
}

/// Counters reported by one worker at one point in time.
///
/// `coverage` is whatever the worker reports and may exceed 100 once the
/// worker has completed more than one full pass over its budget.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Snapshot {
    pub coverage: f64,
    pub errors: u64,
}

impl Snapshot {
    pub fn new(coverage: f64, errors: u64) -> Self {
        Self { coverage, errors }
    }
}

/// Lifecycle reported by the external process itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Spawned but has not reported any counters yet.
    Initializing,
    Running,
    /// The process acknowledged a stop request and is winding down.
    ShuttingDown,
    Exited,
}

/// Parameters handed to a [`WorkerLauncher`](super::WorkerLauncher) for one worker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaunchSpec {
    pub worker: WorkerId,
    pub ram_share_mb: f64,
    pub start_minimized: bool,
}
