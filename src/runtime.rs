//! Runtime glue that wires configs, telemetry, the halt trigger, the published
//! aggregate, and runner orchestration.

pub mod config;
pub mod halt;
pub mod record;
pub mod runner;
pub mod telemetry;
