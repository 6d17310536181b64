use std::time::Duration;

use crate::support::helpers::{fast_config, init_tracing};
use anyhow::{Context, Result};
use stresspool::{CommandLauncher, HaltReason, LaunchError, StopConfig, Supervisor};
use tokio::time::timeout;

const COUNTING_WORKER: &str = r#"
trap 'echo status=stopping; exit 0' TERM
coverage=0
while true; do
  coverage=$((coverage + 5))
  echo "coverage=$coverage errors=$STRESSPOOL_WORKER_ID"
  sleep 0.05
done
"#;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shell_workers_stop_at_threshold() -> Result<()> {
    init_tracing();
    let launcher = CommandLauncher::new("sh").args(["-c", COUNTING_WORKER]);
    let config = fast_config(2, StopConfig::per_worker(20))
        .poll_interval(Duration::from_millis(20))
        .build()?;
    let mut supervisor = Supervisor::new(config, launcher);
    supervisor.start().await?;

    let report = timeout(Duration::from_secs(20), supervisor.wait_stopped())
        .await
        .context("shell workers should pass the threshold and exit")??;

    assert_eq!(report.reason, HaltReason::AllFinished);
    for (id, snapshot) in report.aggregate.per_worker().iter().enumerate() {
        assert!(snapshot.coverage > 20.0, "worker {id}: {snapshot:?}");
        assert_eq!(snapshot.errors, id as u64);
    }
    assert_eq!(report.aggregate.total_errors(), 1);

    supervisor.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn manual_stop_terminates_shell_workers() -> Result<()> {
    init_tracing();
    let launcher = CommandLauncher::new("sh").args(["-c", COUNTING_WORKER]);
    let mut supervisor = Supervisor::new(
        fast_config(2, StopConfig::manual()).build()?,
        launcher,
    );
    supervisor.start().await?;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let report = timeout(Duration::from_secs(20), supervisor.stop()).await??;

    assert_eq!(report.reason, HaltReason::Manual);
    assert!(report.aggregate.total_coverage() > 0.0);
    Ok(())
}

#[tokio::test]
async fn missing_executable_fails_start() -> Result<()> {
    init_tracing();
    let launcher = CommandLauncher::new("stresspool-no-such-worker-binary");
    let mut supervisor = Supervisor::new(
        fast_config(2, StopConfig::manual()).build()?,
        launcher,
    );

    let err = supervisor.start().await.unwrap_err();
    assert!(matches!(err, LaunchError::ExecutableNotFound { .. }));
    assert!(!supervisor.is_running());
    Ok(())
}
