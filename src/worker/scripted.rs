//! In-memory workers driven by the test body instead of a real process.

use super::error::{LaunchError, TerminateFailure};
use super::process::{LaunchFuture, WorkerLauncher, WorkerProcess};
use super::types::{LaunchSpec, ProcessStatus, Snapshot, WorkerId};
use anyhow::Result;
use futures::future::{self, BoxFuture};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub(crate) struct ScriptedState {
    pub status: ProcessStatus,
    pub snapshot: Option<Snapshot>,
    pub unresponsive: bool,
    pub exit_on_stop: bool,
    pub stop_requests: usize,
    pub kills: usize,
    pub kill_fails: bool,
    pub visible: Option<bool>,
}

pub(crate) struct ScriptedWorker {
    state: Mutex<ScriptedState>,
}

impl ScriptedWorker {
    fn new() -> Self {
        Self {
            state: Mutex::new(ScriptedState {
                status: ProcessStatus::Initializing,
                snapshot: None,
                unresponsive: false,
                exit_on_stop: true,
                stop_requests: 0,
                kills: 0,
                kill_fails: false,
                visible: None,
            }),
        }
    }

    pub(crate) fn report(&self, coverage: f64, errors: u64) {
        let mut state = self.state.lock().unwrap();
        if state.status == ProcessStatus::Initializing {
            state.status = ProcessStatus::Running;
        }
        state.snapshot = Some(Snapshot::new(coverage, errors));
    }

    pub(crate) fn set_unresponsive(&self, unresponsive: bool) {
        self.state.lock().unwrap().unresponsive = unresponsive;
    }

    /// Keeps the worker in `ShuttingDown` after a stop request until [`Self::exit`].
    pub(crate) fn linger_on_stop(&self) {
        self.state.lock().unwrap().exit_on_stop = false;
    }

    /// Makes every later kill fail and leaves the worker alive.
    pub(crate) fn fail_kills(&self) {
        self.state.lock().unwrap().kill_fails = true;
    }

    pub(crate) fn exit(&self) {
        self.state.lock().unwrap().status = ProcessStatus::Exited;
    }

    pub(crate) fn state(&self) -> ScriptedState {
        self.state.lock().unwrap().clone()
    }
}

struct ScriptedProcess {
    worker: Arc<ScriptedWorker>,
}

impl WorkerProcess for ScriptedProcess {
    fn pid(&self) -> Option<u32> {
        None
    }

    fn status(&self) -> ProcessStatus {
        self.worker.state().status
    }

    fn sample(&self) -> BoxFuture<'_, Option<Snapshot>> {
        let state = self.worker.state();
        if state.unresponsive {
            return Box::pin(future::pending());
        }
        Box::pin(future::ready(state.snapshot))
    }

    fn request_stop(&self) -> BoxFuture<'_, Result<()>> {
        let mut state = self.worker.state.lock().unwrap();
        state.stop_requests += 1;
        state.status = if state.exit_on_stop {
            ProcessStatus::Exited
        } else {
            ProcessStatus::ShuttingDown
        };
        Box::pin(future::ready(Ok(())))
    }

    fn kill(&self) -> BoxFuture<'_, Result<(), TerminateFailure>> {
        let mut state = self.worker.state.lock().unwrap();
        state.kills += 1;
        if state.kill_fails {
            return Box::pin(future::ready(Err(TerminateFailure {
                pid: None,
                reason: "operation not permitted".to_string(),
            })));
        }
        state.status = ProcessStatus::Exited;
        Box::pin(future::ready(Ok(())))
    }

    fn set_visible(&self, visible: bool) {
        self.worker.state.lock().unwrap().visible = Some(visible);
    }
}

pub(crate) struct ScriptedLauncher {
    workers: Vec<Arc<ScriptedWorker>>,
    fail_on: Option<WorkerId>,
    launches: Mutex<Vec<LaunchSpec>>,
}

impl ScriptedLauncher {
    pub(crate) fn new(workers: usize) -> Self {
        Self {
            workers: (0..workers).map(|_| Arc::new(ScriptedWorker::new())).collect(),
            fail_on: None,
            launches: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing_on(mut self, worker: WorkerId) -> Self {
        self.fail_on = Some(worker);
        self
    }

    pub(crate) fn failing_kill_on(self, worker: WorkerId) -> Self {
        self.workers[worker].fail_kills();
        self
    }

    pub(crate) fn worker(&self, id: WorkerId) -> Arc<ScriptedWorker> {
        self.workers[id].clone()
    }

    pub(crate) fn launches(&self) -> Vec<LaunchSpec> {
        self.launches.lock().unwrap().clone()
    }
}

impl WorkerLauncher for ScriptedLauncher {
    fn executable_name(&self) -> &str {
        "stresspool-scripted-worker"
    }

    fn launch(&self, spec: LaunchSpec) -> LaunchFuture<'_> {
        self.launches.lock().unwrap().push(spec);
        let result = if self.fail_on == Some(spec.worker) {
            Err(LaunchError::SpawnFailed {
                worker: spec.worker,
                reason: "scripted failure".to_string(),
            })
        } else {
            match self.workers.get(spec.worker) {
                Some(worker) => Ok(Box::new(ScriptedProcess {
                    worker: worker.clone(),
                }) as Box<dyn WorkerProcess>),
                None => Err(LaunchError::SpawnFailed {
                    worker: spec.worker,
                    reason: "no scripted worker for this slot".to_string(),
                }),
            }
        };
        Box::pin(future::ready(result))
    }
}
