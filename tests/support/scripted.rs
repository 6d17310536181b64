//! Workers whose counters and lifecycle are driven by the test body.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use futures::future::{self, BoxFuture};
use stresspool::{
    LaunchError, LaunchFuture, LaunchSpec, ProcessStatus, Snapshot, TerminateFailure,
    TerminateReport, WorkerId, WorkerLauncher, WorkerProcess,
};

#[derive(Debug, Clone)]
pub struct WorkerScript {
    pub status: ProcessStatus,
    pub snapshot: Option<Snapshot>,
    pub unresponsive: bool,
    pub panic_on_sample: bool,
    pub exit_on_stop: bool,
    pub stop_requests: usize,
    pub kills: usize,
}

pub struct ScriptedWorker {
    script: Mutex<WorkerScript>,
}

impl ScriptedWorker {
    fn new() -> Self {
        Self {
            script: Mutex::new(WorkerScript {
                status: ProcessStatus::Initializing,
                snapshot: None,
                unresponsive: false,
                panic_on_sample: false,
                exit_on_stop: true,
                stop_requests: 0,
                kills: 0,
            }),
        }
    }

    pub fn report(&self, coverage: f64, errors: u64) {
        let mut script = self.script.lock().unwrap();
        if script.status == ProcessStatus::Initializing {
            script.status = ProcessStatus::Running;
        }
        script.snapshot = Some(Snapshot::new(coverage, errors));
    }

    pub fn set_unresponsive(&self, unresponsive: bool) {
        self.script.lock().unwrap().unresponsive = unresponsive;
    }

    /// Makes the next sample panic inside the caller's poll.
    pub fn panic_on_sample(&self) {
        self.script.lock().unwrap().panic_on_sample = true;
    }

    pub fn linger_on_stop(&self) {
        self.script.lock().unwrap().exit_on_stop = false;
    }

    pub fn exit(&self) {
        self.script.lock().unwrap().status = ProcessStatus::Exited;
    }

    pub fn script(&self) -> WorkerScript {
        self.script.lock().unwrap().clone()
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
        self.worker.script().status
    }

    fn sample(&self) -> BoxFuture<'_, Option<Snapshot>> {
        let script = self.worker.script();
        if script.panic_on_sample {
            panic!("scripted worker sample panicked");
        }
        if script.unresponsive {
            return Box::pin(future::pending());
        }
        Box::pin(future::ready(script.snapshot))
    }

    fn request_stop(&self) -> BoxFuture<'_, Result<()>> {
        let mut script = self.worker.script.lock().unwrap();
        script.stop_requests += 1;
        script.status = if script.exit_on_stop {
            ProcessStatus::Exited
        } else {
            ProcessStatus::ShuttingDown
        };
        Box::pin(future::ready(Ok(())))
    }

    fn kill(&self) -> BoxFuture<'_, Result<(), TerminateFailure>> {
        let mut script = self.worker.script.lock().unwrap();
        script.kills += 1;
        script.status = ProcessStatus::Exited;
        Box::pin(future::ready(Ok(())))
    }
}

struct LauncherState {
    workers: Vec<Arc<ScriptedWorker>>,
    fail_on: Mutex<Option<WorkerId>>,
    launches: Mutex<Vec<LaunchSpec>>,
    orphans: AtomicUsize,
    orphan_sweeps: AtomicUsize,
}

/// Launcher backed by a fixed set of scripted workers, one per slot.
#[derive(Clone)]
pub struct ScriptedLauncher {
    state: Arc<LauncherState>,
}

impl ScriptedLauncher {
    pub fn new(workers: usize) -> Self {
        Self {
            state: Arc::new(LauncherState {
                workers: (0..workers).map(|_| Arc::new(ScriptedWorker::new())).collect(),
                fail_on: Mutex::new(None),
                launches: Mutex::new(Vec::new()),
                orphans: AtomicUsize::new(0),
                orphan_sweeps: AtomicUsize::new(0),
            }),
        }
    }

    pub fn fail_on(&self, worker: WorkerId) {
        *self.state.fail_on.lock().unwrap() = Some(worker);
    }

    pub fn clear_failure(&self) {
        *self.state.fail_on.lock().unwrap() = None;
    }

    /// Pretends `count` workers from an earlier run are still alive on the host.
    pub fn leave_orphans(&self, count: usize) {
        self.state.orphans.store(count, Ordering::SeqCst);
    }

    pub fn orphans(&self) -> usize {
        self.state.orphans.load(Ordering::SeqCst)
    }

    pub fn orphan_sweeps(&self) -> usize {
        self.state.orphan_sweeps.load(Ordering::SeqCst)
    }

    pub fn worker(&self, id: WorkerId) -> Arc<ScriptedWorker> {
        self.state.workers[id].clone()
    }

    pub fn report_all(&self, values: &[(f64, u64)]) {
        for (id, (coverage, errors)) in values.iter().enumerate() {
            self.worker(id).report(*coverage, *errors);
        }
    }

    pub fn launches(&self) -> Vec<LaunchSpec> {
        self.state.launches.lock().unwrap().clone()
    }
}

impl WorkerLauncher for ScriptedLauncher {
    fn executable_name(&self) -> &str {
        "scripted-worker"
    }

    fn launch(&self, spec: LaunchSpec) -> LaunchFuture<'_> {
        self.state.launches.lock().unwrap().push(spec);
        let failing = *self.state.fail_on.lock().unwrap() == Some(spec.worker);
        let result: Result<Box<dyn WorkerProcess>, LaunchError> = if failing {
            Err(LaunchError::SpawnFailed {
                worker: spec.worker,
                reason: "scripted failure".to_string(),
            })
        } else {
            Ok(Box::new(ScriptedProcess {
                worker: self.worker(spec.worker),
            }))
        };
        Box::pin(future::ready(result))
    }

    fn terminate_all_of_kind(&self) -> BoxFuture<'_, TerminateReport> {
        self.state.orphan_sweeps.fetch_add(1, Ordering::SeqCst);
        let terminated = self.state.orphans.swap(0, Ordering::SeqCst);
        Box::pin(future::ready(TerminateReport {
            terminated,
            failures: Vec::new(),
        }))
    }
}
