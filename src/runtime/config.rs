use crate::runtime::telemetry;
use anyhow::{bail, Context, Result};
use std::time::Duration;

/// Period of the aggregator poll loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);
/// Period of the session clock.
pub const DEFAULT_CLOCK_INTERVAL: Duration = Duration::from_secs(1);
/// Period used while waiting for stopping workers to settle.
pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_MAX_WORKERS_PER_CPU: usize = 4;

/// How the pool decides on its own that a run is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopMode {
    /// Only an explicit stop (or every worker finishing) ends the run.
    #[default]
    Manual,
    /// Stop each worker once its own coverage passes the threshold.
    PerWorker(u32),
    /// Stop the whole pool once total coverage passes the threshold.
    PoolTotal(u32),
}

/// Stop conditions captured when the pool starts.
///
/// Thresholds are taken as given; callers validate user input before
/// building one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StopConfig {
    mode: StopMode,
    stop_on_any_error: bool,
}

impl StopConfig {
    pub fn new(mode: StopMode, stop_on_any_error: bool) -> Self {
        Self {
            mode,
            stop_on_any_error,
        }
    }

    pub fn manual() -> Self {
        Self::default()
    }

    pub fn per_worker(percent: u32) -> Self {
        Self::new(StopMode::PerWorker(percent), false)
    }

    pub fn pool_total(percent: u32) -> Self {
        Self::new(StopMode::PoolTotal(percent), false)
    }

    pub fn with_stop_on_any_error(mut self, enabled: bool) -> Self {
        self.stop_on_any_error = enabled;
        self
    }

    pub fn mode(&self) -> StopMode {
        self.mode
    }

    pub fn per_worker_stop_at_percent(&self) -> Option<u32> {
        match self.mode {
            StopMode::PerWorker(percent) => Some(percent),
            _ => None,
        }
    }

    pub fn pool_stop_at_percent(&self) -> Option<u32> {
        match self.mode {
            StopMode::PoolTotal(percent) => Some(percent),
            _ => None,
        }
    }

    pub fn stop_on_any_error(&self) -> bool {
        self.stop_on_any_error
    }
}

/// Runtime configuration for one supervised pool.
///
/// All instances must be constructed via [`SupervisorConfig::builder`] or
/// [`SupervisorConfig::new`] so invariants are validated before any consumer
/// observes the values.
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorConfig {
    worker_count: usize,
    total_ram_mb: f64,
    start_minimized: bool,
    stop: StopConfig,
    poll_interval: Duration,
    poll_timeout: Duration,
    clock_interval: Duration,
    drain_interval: Duration,
    metrics_interval: Duration,
    max_workers_per_cpu: usize,
    terminate_orphans_on_start: bool,
}

pub struct SupervisorConfigParams {
    pub worker_count: usize,
    pub total_ram_mb: f64,
    pub start_minimized: bool,
    pub stop: StopConfig,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
    pub clock_interval: Duration,
    pub drain_interval: Duration,
    pub metrics_interval: Duration,
    pub max_workers_per_cpu: usize,
    pub terminate_orphans_on_start: bool,
}

impl SupervisorConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> SupervisorConfigBuilder {
        SupervisorConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    pub fn new(params: SupervisorConfigParams) -> Result<Self> {
        let SupervisorConfigParams {
            worker_count,
            total_ram_mb,
            start_minimized,
            stop,
            poll_interval,
            poll_timeout,
            clock_interval,
            drain_interval,
            metrics_interval,
            max_workers_per_cpu,
            terminate_orphans_on_start,
        } = params;

        let config = Self {
            worker_count,
            total_ram_mb,
            start_minimized,
            stop,
            poll_interval,
            poll_timeout,
            clock_interval,
            drain_interval,
            metrics_interval,
            max_workers_per_cpu,
            terminate_orphans_on_start,
        };

        config.validate()?;
        Ok(config)
    }

    /// Number of workers in the pool.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Total memory budget in MB, split evenly across workers.
    pub fn total_ram_mb(&self) -> f64 {
        self.total_ram_mb
    }

    /// Budget handed to each individual worker.
    pub fn ram_share_mb(&self) -> f64 {
        self.total_ram_mb / self.worker_count as f64
    }

    pub fn start_minimized(&self) -> bool {
        self.start_minimized
    }

    pub fn stop(&self) -> StopConfig {
        self.stop
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Longest the aggregator waits for a single worker's counters.
    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    pub fn clock_interval(&self) -> Duration {
        self.clock_interval
    }

    pub fn drain_interval(&self) -> Duration {
        self.drain_interval
    }

    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    pub fn max_workers_per_cpu(&self) -> usize {
        self.max_workers_per_cpu
    }

    /// Upper bound on the pool size for this host.
    pub fn max_workers(&self) -> usize {
        detected_cpus().saturating_mul(self.max_workers_per_cpu)
    }

    /// Whether stray workers from earlier runs are killed before starting.
    pub fn terminate_orphans_on_start(&self) -> bool {
        self.terminate_orphans_on_start
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            bail!("worker_count must be greater than 0");
        }

        if !self.total_ram_mb.is_finite() {
            bail!("total_ram_mb must be a finite number");
        }

        if self.total_ram_mb < self.worker_count as f64 {
            bail!(
                "total_ram_mb ({}) must be at least worker_count ({})",
                self.total_ram_mb,
                self.worker_count
            );
        }

        if self.poll_interval.is_zero() {
            bail!("poll_interval must be greater than 0");
        }

        if self.poll_timeout.is_zero() {
            bail!("poll_timeout must be greater than 0");
        }

        if self.clock_interval.is_zero() {
            bail!("clock_interval must be greater than 0");
        }

        if self.drain_interval.is_zero() {
            bail!("drain_interval must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        if self.max_workers_per_cpu == 0 {
            bail!("max_workers_per_cpu must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct SupervisorConfigBuilder {
    worker_count: Option<usize>,
    total_ram_mb: Option<f64>,
    start_minimized: Option<bool>,
    stop: Option<StopConfig>,
    poll_interval: Option<Duration>,
    poll_timeout: Option<Duration>,
    clock_interval: Option<Duration>,
    drain_interval: Option<Duration>,
    metrics_interval: Option<Duration>,
    max_workers_per_cpu: Option<usize>,
    terminate_orphans_on_start: Option<bool>,
}

impl SupervisorConfigBuilder {
    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = Some(count);
        self
    }

    pub fn total_ram_mb(mut self, megabytes: f64) -> Self {
        self.total_ram_mb = Some(megabytes);
        self
    }

    pub fn start_minimized(mut self, minimized: bool) -> Self {
        self.start_minimized = Some(minimized);
        self
    }

    pub fn stop(mut self, stop: StopConfig) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = Some(timeout);
        self
    }

    pub fn clock_interval(mut self, interval: Duration) -> Self {
        self.clock_interval = Some(interval);
        self
    }

    pub fn drain_interval(mut self, interval: Duration) -> Self {
        self.drain_interval = Some(interval);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn max_workers_per_cpu(mut self, workers: usize) -> Self {
        self.max_workers_per_cpu = Some(workers);
        self
    }

    pub fn terminate_orphans_on_start(mut self, enabled: bool) -> Self {
        self.terminate_orphans_on_start = Some(enabled);
        self
    }

    pub fn build(self) -> Result<SupervisorConfig> {
        let poll_interval = self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL);
        let params = SupervisorConfigParams {
            worker_count: self.worker_count.context("worker_count is required")?,
            total_ram_mb: self.total_ram_mb.context("total_ram_mb is required")?,
            start_minimized: self.start_minimized.unwrap_or(false),
            stop: self.stop.unwrap_or_default(),
            poll_interval,
            poll_timeout: self.poll_timeout.unwrap_or(poll_interval),
            clock_interval: self.clock_interval.unwrap_or(DEFAULT_CLOCK_INTERVAL),
            drain_interval: self.drain_interval.unwrap_or(DEFAULT_DRAIN_INTERVAL),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
            max_workers_per_cpu: self
                .max_workers_per_cpu
                .unwrap_or(DEFAULT_MAX_WORKERS_PER_CPU),
            terminate_orphans_on_start: self.terminate_orphans_on_start.unwrap_or(false),
        };

        SupervisorConfig::new(params)
    }
}

/// Number of processors available to this process (at least 1).
pub fn detected_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(1)
}

/// Physical memory currently available for new allocations, in MB.
///
/// Useful as a default budget when the user does not specify one.
#[cfg(target_os = "linux")]
pub fn available_memory_mb() -> Option<u64> {
    let contents = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_meminfo_available_mb(&contents)
}

#[cfg(not(target_os = "linux"))]
pub fn available_memory_mb() -> Option<u64> {
    None
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_meminfo_available_mb(contents: &str) -> Option<u64> {
    contents
        .lines()
        .find_map(|line| line.strip_prefix("MemAvailable:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb / 1024)
}
