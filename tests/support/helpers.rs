use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use stresspool::{StopConfig, Supervisor, SupervisorConfig, SupervisorConfigBuilder};
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use super::scripted::ScriptedLauncher;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

/// Fast intervals so a whole run fits comfortably in a test.
pub fn fast_config(workers: usize, stop: StopConfig) -> SupervisorConfigBuilder {
    SupervisorConfig::builder()
        .worker_count(workers)
        .total_ram_mb(256.0 * workers as f64)
        .stop(stop)
        .poll_interval(Duration::from_millis(10))
        .clock_interval(Duration::from_millis(20))
        .drain_interval(Duration::from_millis(5))
        .metrics_interval(Duration::from_millis(50))
}

pub fn scripted_supervisor(
    workers: usize,
    stop: StopConfig,
) -> Result<(Supervisor, ScriptedLauncher)> {
    let launcher = ScriptedLauncher::new(workers);
    let config = fast_config(workers, stop).build()?;
    let supervisor = Supervisor::new(config, launcher.clone());
    Ok((supervisor, launcher))
}

pub async fn wait_for_version(
    supervisor: &Supervisor,
    version: u64,
    timeout: Duration,
) -> Result<()> {
    let start = Instant::now();
    loop {
        let current = supervisor
            .aggregate()
            .map(|record| record.version())
            .unwrap_or_default();
        if current >= version {
            return Ok(());
        }
        if start.elapsed() > timeout {
            bail!("timed out waiting for aggregate version {version}; last seen {current}");
        }
        sleep(Duration::from_millis(5)).await;
    }
}

pub async fn wait_for_total_coverage(
    supervisor: &Supervisor,
    expected: f64,
    timeout: Duration,
) -> Result<()> {
    let start = Instant::now();
    loop {
        let current = supervisor
            .aggregate()
            .map(|record| record.total_coverage())
            .unwrap_or_default();
        if (current - expected).abs() < 1e-9 {
            return Ok(());
        }
        if start.elapsed() > timeout {
            bail!("timed out waiting for total coverage {expected}; last seen {current}");
        }
        sleep(Duration::from_millis(5)).await;
    }
}

pub async fn wait_for_condition<F>(mut check: F, timeout: Duration, what: &str) -> Result<()>
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    while !check() {
        if start.elapsed() > timeout {
            bail!("timed out waiting for {what}");
        }
        sleep(Duration::from_millis(5)).await;
    }
    Ok(())
}
