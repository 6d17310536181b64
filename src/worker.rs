//! Worker module split across focused submodules:
//! - `types`: ids, lifecycle states and counter snapshots
//! - `error`: launch and terminate failures
//! - `process`: the seam traits every external worker is reached through
//! - `handle`: per-worker state machine owned by the pool
//! - `command`: OS-process launcher speaking the line protocol from `report`
//! - `reaper`: host-wide lookup and kill of workers by executable name
//! - `tests`: handle unit tests over scripted workers

mod command;
mod error;
mod handle;
mod process;
pub mod reaper;
mod report;
mod types;

#[cfg(test)]
pub(crate) mod scripted;

pub use command::{
    CommandLauncher, CommandWorker, ENV_RAM_MB, ENV_START_MINIMIZED, ENV_WORKER_ID,
};
pub use error::{LaunchError, TerminateFailure, TerminateReport};
pub use handle::{WorkerHandle, WorkerView};
pub use process::{LaunchFuture, WorkerLauncher, WorkerProcess};
pub use report::{parse_report_line, ReportLine};
pub use types::{LaunchSpec, ProcessStatus, Snapshot, WorkerId, WorkerState};
