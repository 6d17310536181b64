pub mod runtime;
pub mod supervisor;
pub mod worker;

pub use runtime::config::{
    available_memory_mb, detected_cpus, StopConfig, StopMode, SupervisorConfig,
    SupervisorConfigBuilder, SupervisorConfigParams,
};
pub use runtime::halt::{HaltHandle, HaltReason};
pub use runtime::record::{AggregateRecord, AggregateStore};
pub use runtime::runner::Runner;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use supervisor::{Estimate, SessionStats, StopReport, Supervisor, WorkerPool};
pub use worker::{
    CommandLauncher, LaunchError, LaunchFuture, LaunchSpec, ProcessStatus, Snapshot,
    TerminateFailure, TerminateReport, WorkerId, WorkerLauncher, WorkerProcess, WorkerState,
    WorkerView,
};
