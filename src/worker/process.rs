use super::error::{LaunchError, TerminateFailure, TerminateReport};
use super::reaper;
use super::types::{LaunchSpec, ProcessStatus, Snapshot};
use anyhow::Result;
use futures::future::BoxFuture;

pub type LaunchFuture<'a> = BoxFuture<'a, Result<Box<dyn WorkerProcess>, LaunchError>>;

/// One running external worker, as seen from the supervisor.
///
/// Implementations must keep `status` and `sample` cheap: the aggregator calls
/// them for every worker on every tick.
pub trait WorkerProcess: Send + Sync + 'static {
    /// OS process id, when the worker is backed by a real process.
    fn pid(&self) -> Option<u32>;

    /// Lifecycle as reported by the process itself.
    fn status(&self) -> ProcessStatus;

    /// Reads the current counters. `None` while the worker has not produced
    /// any counters yet; after exit, the last counters it produced.
    fn sample(&self) -> BoxFuture<'_, Option<Snapshot>>;

    /// Asks the worker to finish its current pass and exit.
    fn request_stop(&self) -> BoxFuture<'_, Result<()>>;

    /// Kills the worker immediately.
    fn kill(&self) -> BoxFuture<'_, Result<(), TerminateFailure>>;

    /// Shows or hides the worker's own surface, if it has one.
    fn set_visible(&self, _visible: bool) {}
}

/// Factory for workers of one executable kind.
pub trait WorkerLauncher: Send + Sync + 'static {
    /// Name used to find stray processes of this kind on the host.
    fn executable_name(&self) -> &str;

    fn launch(&self, spec: LaunchSpec) -> LaunchFuture<'_>;

    /// Force-kills every process on the host that matches
    /// [`executable_name`](Self::executable_name), whoever started it.
    fn terminate_all_of_kind(&self) -> BoxFuture<'_, TerminateReport> {
        let name = self.executable_name().to_owned();
        Box::pin(async move {
            match tokio::task::spawn_blocking(move || reaper::terminate_processes_named(&name))
                .await
            {
                Ok(report) => report,
                Err(err) => TerminateReport {
                    terminated: 0,
                    failures: vec![TerminateFailure {
                        pid: None,
                        reason: format!("process scan task failed: {err}"),
                    }],
                },
            }
        })
    }
}
