//! Workers backed by real OS processes.
//!
//! A [`CommandLauncher`] spawns one child per worker and hands the worker its
//! budget through environment variables. The child reports progress on stdout
//! using the [`report`](super::report) line protocol; a reader task keeps the
//! latest counters and a watcher task observes the exit.

use super::error::{LaunchError, TerminateFailure};
use super::process::{LaunchFuture, WorkerLauncher, WorkerProcess};
use super::reaper::normalize_executable_name;
use super::report::{parse_report_line, ReportLine};
use super::types::{LaunchSpec, ProcessStatus, Snapshot, WorkerId};
use anyhow::Result;
use futures::future::BoxFuture;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const ENV_WORKER_ID: &str = "STRESSPOOL_WORKER_ID";
pub const ENV_RAM_MB: &str = "STRESSPOOL_RAM_MB";
pub const ENV_START_MINIMIZED: &str = "STRESSPOOL_START_MINIMIZED";

const KILL_WAIT_TIMEOUT: Duration = Duration::from_secs(5);
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Launches workers by spawning `program` once per worker.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    program: PathBuf,
    executable_name: String,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
}

impl CommandLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        let executable_name = normalize_executable_name(&program.to_string_lossy()).to_owned();
        Self {
            program,
            executable_name,
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Locates the executable, either at the given path or on `PATH`.
    pub fn resolve_program(&self) -> Result<PathBuf, LaunchError> {
        let not_found = || LaunchError::ExecutableNotFound {
            program: self.program.display().to_string(),
        };

        if self.program.components().count() > 1 {
            return if self.program.is_file() {
                Ok(self.program.clone())
            } else {
                Err(not_found())
            };
        }
        which::which(&self.program).map_err(|_| not_found())
    }

    async fn spawn_worker(&self, spec: LaunchSpec) -> Result<CommandWorker, LaunchError> {
        let program = self.resolve_program()?;

        let mut command = Command::new(&program);
        command
            .args(&self.args)
            .envs(self.envs.iter().map(|(key, value)| (key, value)))
            .env(ENV_WORKER_ID, spec.worker.to_string())
            .env(ENV_RAM_MB, format!("{:.3}", spec.ram_share_mb))
            .env(
                ENV_START_MINIMIZED,
                if spec.start_minimized { "1" } else { "0" },
            )
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|err| LaunchError::SpawnFailed {
            worker: spec.worker,
            reason: err.to_string(),
        })?;

        CommandWorker::watch(spec.worker, child)
    }
}

impl WorkerLauncher for CommandLauncher {
    fn executable_name(&self) -> &str {
        &self.executable_name
    }

    fn launch(&self, spec: LaunchSpec) -> LaunchFuture<'_> {
        Box::pin(async move {
            let worker = self.spawn_worker(spec).await?;
            Ok(Box::new(worker) as Box<dyn WorkerProcess>)
        })
    }
}

#[derive(Debug, Default)]
struct ChildState {
    latest: Mutex<Option<Snapshot>>,
    stopping: AtomicBool,
    reaped: AtomicBool,
    exited: AtomicBool,
    exit_notify: Notify,
}

impl ChildState {
    fn latest(&self) -> Option<Snapshot> {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, snapshot: Snapshot) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
    }

    fn mark_exited(&self) {
        self.exited.store(true, Ordering::SeqCst);
        self.exit_notify.notify_waiters();
    }

    async fn wait_exited(&self) {
        loop {
            let notified = self.exit_notify.notified();
            if self.exited.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}

type StopReply = oneshot::Sender<Result<()>>;

/// A running child process spawned by [`CommandLauncher`].
///
/// Signals go through the task that owns the [`Child`], so nothing is sent to
/// a pid once the child has been reaped.
pub struct CommandWorker {
    id: WorkerId,
    pid: Option<u32>,
    state: Arc<ChildState>,
    stop_tx: mpsc::UnboundedSender<StopReply>,
    kill_token: CancellationToken,
}

impl CommandWorker {
    fn watch(id: WorkerId, mut child: Child) -> Result<Self, LaunchError> {
        let stdout = child.stdout.take().ok_or_else(|| LaunchError::SpawnFailed {
            worker: id,
            reason: "child stdout not captured".to_owned(),
        })?;
        let pid = child.id();
        let state = Arc::new(ChildState::default());
        let kill_token = CancellationToken::new();
        let (stop_tx, stop_rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(read_reports(id, stdout, state.clone()));
        tokio::spawn(watch_exit(ChildWatch {
            id,
            child,
            reader,
            state: state.clone(),
            stop_rx,
            kill_token: kill_token.clone(),
        }));

        Ok(Self {
            id,
            pid,
            state,
            stop_tx,
            kill_token,
        })
    }
}

async fn read_reports(id: WorkerId, stdout: ChildStdout, state: Arc<ChildState>) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match parse_report_line(&line) {
                Some(ReportLine::Progress(snapshot)) => state.record(snapshot),
                Some(ReportLine::Stopping) => state.stopping.store(true, Ordering::SeqCst),
                None => tracing::trace!(worker = id, line = %line, "ignoring worker output"),
            },
            Ok(None) => break,
            Err(err) => {
                tracing::debug!(worker = id, error = %err, "failed to read worker output");
                break;
            }
        }
    }
}

struct ChildWatch {
    id: WorkerId,
    child: Child,
    reader: JoinHandle<()>,
    state: Arc<ChildState>,
    stop_rx: mpsc::UnboundedReceiver<StopReply>,
    kill_token: CancellationToken,
}

async fn watch_exit(watch: ChildWatch) {
    let ChildWatch {
        id,
        mut child,
        reader,
        state,
        mut stop_rx,
        kill_token,
    } = watch;

    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            _ = kill_token.cancelled() => {
                if let Err(err) = child.start_kill() {
                    tracing::debug!(worker = id, error = %err, "kill request on exited worker");
                }
                break child.wait().await;
            }
            Some(reply) = stop_rx.recv() => {
                let _ = reply.send(send_terminate(id, &mut child));
            }
        }
    };
    state.reaped.store(true, Ordering::SeqCst);
    // pending stop requests resolve as delivered: the process is already gone
    drop(stop_rx);

    match status {
        Ok(status) => tracing::debug!(worker = id, %status, "worker process exited"),
        Err(err) => tracing::warn!(worker = id, error = %err, "failed to wait for worker process"),
    }

    // Lines written just before exit must land before the worker reads as exited.
    // A grandchild holding the pipe open must not keep it from exiting.
    if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, reader).await.is_err() {
        tracing::debug!(worker = id, "worker output still open after exit");
    }
    state.mark_exited();
}

impl WorkerProcess for CommandWorker {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn status(&self) -> ProcessStatus {
        if self.state.exited.load(Ordering::SeqCst) {
            ProcessStatus::Exited
        } else if self.state.reaped.load(Ordering::SeqCst)
            || self.state.stopping.load(Ordering::SeqCst)
        {
            ProcessStatus::ShuttingDown
        } else if self.state.latest().is_some() {
            ProcessStatus::Running
        } else {
            ProcessStatus::Initializing
        }
    }

    fn sample(&self) -> BoxFuture<'_, Option<Snapshot>> {
        Box::pin(async move { self.state.latest() })
    }

    fn request_stop(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.state.reaped.load(Ordering::SeqCst) {
                return Ok(());
            }
            let (reply_tx, reply_rx) = oneshot::channel();
            if self.stop_tx.send(reply_tx).is_err() {
                return Ok(());
            }
            reply_rx.await.unwrap_or(Ok(()))
        })
    }

    fn kill(&self) -> BoxFuture<'_, Result<(), TerminateFailure>> {
        Box::pin(async move {
            self.kill_token.cancel();
            tokio::time::timeout(KILL_WAIT_TIMEOUT, self.state.wait_exited())
                .await
                .map_err(|_| TerminateFailure {
                    pid: self.pid,
                    reason: format!("worker {} did not exit after kill", self.id),
                })
        })
    }

    fn set_visible(&self, visible: bool) {
        tracing::trace!(worker = self.id, visible, "command workers have no surface to toggle");
    }
}

#[cfg(unix)]
fn send_terminate(id: WorkerId, child: &mut Child) -> Result<()> {
    use anyhow::Context;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // `None` once the child has been reaped.
    let Some(pid) = child.id() else {
        return Ok(());
    };
    let raw = i32::try_from(pid).with_context(|| format!("worker {id} pid out of range"))?;
    kill(Pid::from_raw(raw), Signal::SIGTERM)
        .with_context(|| format!("failed to send SIGTERM to worker {id}"))
}

#[cfg(not(unix))]
fn send_terminate(id: WorkerId, child: &mut Child) -> Result<()> {
    use anyhow::Context;

    tracing::debug!(worker = id, "graceful stop unsupported; killing worker");
    child
        .start_kill()
        .with_context(|| format!("failed to kill worker {id}"))
}
