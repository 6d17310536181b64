use super::types::WorkerId;
use std::fmt;

/// Failure to bring a worker (or a whole pool) up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchError {
    /// The worker executable could not be located.
    ExecutableNotFound { program: String },
    /// The OS refused to create the worker process.
    SpawnFailed { worker: WorkerId, reason: String },
    /// More workers were requested than the host allows.
    PoolTooLarge { requested: usize, max: usize },
    /// A pool is already running under this supervisor.
    AlreadyRunning,
}

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchError::ExecutableNotFound { program } => {
                write!(f, "worker executable {program} not found")
            }
            LaunchError::SpawnFailed { worker, reason } => {
                write!(f, "failed to spawn worker {worker}: {reason}")
            }
            LaunchError::PoolTooLarge { requested, max } => {
                write!(f, "requested {requested} workers but at most {max} are allowed")
            }
            LaunchError::AlreadyRunning => write!(f, "worker pool is already running"),
        }
    }
}

impl std::error::Error for LaunchError {}

/// A kill request that could not be carried out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminateFailure {
    pub pid: Option<u32>,
    pub reason: String,
}

impl fmt::Display for TerminateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pid {
            Some(pid) => write!(f, "failed to terminate process {pid}: {}", self.reason),
            None => write!(f, "failed to terminate process: {}", self.reason),
        }
    }
}

impl std::error::Error for TerminateFailure {}

/// Outcome of a best-effort bulk terminate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerminateReport {
    pub terminated: usize,
    pub failures: Vec<TerminateFailure>,
}

impl TerminateReport {
    pub fn merge(&mut self, other: TerminateReport) {
        self.terminated += other.terminated;
        self.failures.extend(other.failures);
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}
