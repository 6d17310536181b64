use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use stresspool::{
    available_memory_mb, CommandLauncher, SessionStats, StopConfig, StopMode, StopReport,
    Supervisor, SupervisorConfig,
};
use tokio::signal;
use tokio::time::{interval, MissedTickBehavior};

const DEFAULT_WORKERS: usize = 4;
const DEFAULT_LOG_DIRECTIVE: &str = "warn";
const REFRESH_INTERVAL: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> Result<()> {
    init_demo_tracing();

    let args = DemoArgs::from_env()?;
    let bar = build_progress_bar();
    bar.println(format!(
        "Starting {} workers of {} over {:.0} MB",
        args.workers, args.program, args.total_ram_mb
    ));

    let launcher = CommandLauncher::new(&args.program);
    let config = args.to_supervisor_config()?;
    let mut supervisor = Supervisor::new(config, launcher);
    supervisor
        .start()
        .await
        .context("failed to start worker pool")?;

    let mut refresh = interval(REFRESH_INTERVAL);
    refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let interrupted = loop {
        tokio::select! {
            _ = signal::ctrl_c() => break true,
            result = supervisor.wait_stopped() => {
                result?;
                break false;
            }
            _ = refresh.tick() => render(&bar, &supervisor),
        }
    };

    if interrupted {
        bar.println("Ctrl-C received; waiting for workers to stop");
    }
    let report = supervisor.stop().await?;
    bar.finish_with_message(report.reason.to_string());
    print_summary(&bar, &report);
    Ok(())
}

fn init_demo_tracing() {
    if env::var_os("RUST_LOG").is_none() {
        env::set_var("RUST_LOG", DEFAULT_LOG_DIRECTIVE);
    }
    stresspool::init_tracing();
}

fn build_progress_bar() -> ProgressBar {
    let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stdout_with_hz(8));
    let style = ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
        .expect("valid progress bar template");
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

fn render(bar: &ProgressBar, supervisor: &Supervisor) {
    let Some(aggregate) = supervisor.aggregate() else {
        return;
    };
    let stats = supervisor.session_stats().unwrap_or_default();
    bar.set_message(format!(
        "coverage {:.2}% | errors {} | {}",
        aggregate.total_coverage(),
        aggregate.total_errors(),
        describe_estimate(&stats),
    ));
}

fn describe_estimate(stats: &SessionStats) -> String {
    match stats.estimate {
        Some(estimate) => format!(
            "{:.0}% in {} | {:.2} MB/s",
            estimate.next_milestone,
            format_duration(estimate.remaining),
            estimate.throughput_mb_s
        ),
        None => "estimating...".to_string(),
    }
}

fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds / 60) % 60,
        seconds % 60
    )
}

fn print_summary(bar: &ProgressBar, report: &StopReport) {
    let throughput = report
        .throughput_mb_s
        .map(|rate| format!("{rate:.2} MB/s"))
        .unwrap_or_else(|| "n/a".to_string());
    bar.println(format!(
        "Covered {:.2}% with {} errors in {} [{}]",
        report.aggregate.total_coverage(),
        report.aggregate.total_errors(),
        format_duration(report.elapsed),
        throughput
    ));
    for (id, snapshot) in report.aggregate.per_worker().iter().enumerate() {
        bar.println(format!(
            "  worker {id}: {:.2}% / {} errors",
            snapshot.coverage, snapshot.errors
        ));
    }
}

struct DemoArgs {
    program: String,
    workers: usize,
    total_ram_mb: f64,
    stop_mode: StopMode,
    stop_on_error: bool,
}

impl DemoArgs {
    fn from_env() -> Result<Self> {
        let program = env::var("STRESSPOOL_PROGRAM")
            .context("STRESSPOOL_PROGRAM must name the worker executable")?;
        let workers = parse_env_with_default::<usize>("STRESSPOOL_WORKERS", DEFAULT_WORKERS)?;
        let default_ram = available_memory_mb()
            .map(|mb| mb as f64)
            .unwrap_or(workers as f64 * 256.0);
        let total_ram_mb = parse_env_with_default::<f64>("STRESSPOOL_RAM_MB", default_ram)?;
        let stop_at = parse_optional_env::<u32>("STRESSPOOL_STOP_AT")?;
        let stop_at_total = parse_optional_env::<u32>("STRESSPOOL_STOP_AT_TOTAL")?;
        let stop_on_error = parse_env_with_default::<bool>("STRESSPOOL_STOP_ON_ERROR", false)?;

        ensure!(workers > 0, "STRESSPOOL_WORKERS must be greater than 0");
        ensure!(
            stop_at.is_none() || stop_at_total.is_none(),
            "STRESSPOOL_STOP_AT and STRESSPOOL_STOP_AT_TOTAL are mutually exclusive"
        );
        ensure!(
            stop_at.map_or(true, |percent| percent > 0)
                && stop_at_total.map_or(true, |percent| percent > 0),
            "stop thresholds must be greater than 0"
        );

        let stop_mode = match (stop_at, stop_at_total) {
            (Some(percent), _) => StopMode::PerWorker(percent),
            (_, Some(percent)) => StopMode::PoolTotal(percent),
            _ => StopMode::Manual,
        };

        Ok(Self {
            program,
            workers,
            total_ram_mb,
            stop_mode,
            stop_on_error,
        })
    }

    fn to_supervisor_config(&self) -> Result<SupervisorConfig> {
        SupervisorConfig::builder()
            .worker_count(self.workers)
            .total_ram_mb(self.total_ram_mb)
            .stop(StopConfig::new(self.stop_mode, self.stop_on_error))
            .terminate_orphans_on_start(true)
            .build()
    }
}

fn parse_env_with_default<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    Ok(parse_optional_env(key)?.unwrap_or(default))
}

fn parse_optional_env<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("failed to parse {key}='{value}'")),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed to read {key}")),
    }
}
