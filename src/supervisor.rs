//! Pool supervision split across focused submodules:
//! - `worker_pool`: owns the worker handles; bulk start/stop/terminate
//! - `aggregator`: periodic poll that publishes totals and applies stop policies
//! - `policy`: pure stop-condition checks
//! - `clock`: elapsed time, throughput and time-to-milestone estimates
//! - `lifecycle`: run-scoped background tasks
//! - `controller`: the `Supervisor` API tying a run together

pub mod aggregator;
pub mod clock;
mod controller;
mod lifecycle;
pub mod policy;
pub mod worker_pool;

pub use aggregator::{StopReport, TickOutcome};
pub use clock::{estimate, throughput_mb_s, Estimate, SessionStats};
pub use controller::Supervisor;
pub use worker_pool::{WorkerPool, WorkerPoolParams};
