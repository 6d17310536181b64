use crate::support::helpers::{fast_config, init_tracing};
use crate::support::scripted::ScriptedLauncher;
use anyhow::Result;
use stresspool::{detected_cpus, LaunchError, StopConfig, Supervisor};

#[tokio::test]
async fn failed_worker_start_rolls_back_whole_pool() -> Result<()> {
    init_tracing();
    let launcher = ScriptedLauncher::new(4);
    launcher.fail_on(3);
    let config = fast_config(4, StopConfig::manual())
        .max_workers_per_cpu(4)
        .build()?;
    let mut supervisor = Supervisor::new(config, launcher.clone());

    let err = supervisor.start().await.unwrap_err();

    assert!(matches!(err, LaunchError::SpawnFailed { worker: 3, .. }));
    for id in 0..3 {
        assert_eq!(launcher.worker(id).script().kills, 1, "worker {id}");
    }
    assert_eq!(launcher.worker(3).script().kills, 0);
    assert!(!supervisor.is_running());
    assert!(supervisor.worker_views().is_empty());
    assert!(supervisor.aggregate().is_none());
    assert_eq!(supervisor.telemetry().snapshot().workers_running, 0);
    Ok(())
}

#[tokio::test]
async fn pool_larger_than_host_cap_is_rejected() -> Result<()> {
    init_tracing();
    let workers = detected_cpus() + 1;
    let launcher = ScriptedLauncher::new(workers);
    let config = fast_config(workers, StopConfig::manual())
        .max_workers_per_cpu(1)
        .build()?;
    let mut supervisor = Supervisor::new(config, launcher.clone());

    let err = supervisor.start().await.unwrap_err();

    assert_eq!(
        err,
        LaunchError::PoolTooLarge {
            requested: workers,
            max: detected_cpus(),
        }
    );
    assert!(launcher.launches().is_empty());
    Ok(())
}

#[tokio::test]
async fn supervisor_can_retry_after_failed_start() -> Result<()> {
    init_tracing();
    let launcher = ScriptedLauncher::new(2);
    launcher.fail_on(1);
    let mut supervisor = Supervisor::new(
        fast_config(2, StopConfig::manual()).build()?,
        launcher.clone(),
    );
    assert!(supervisor.start().await.is_err());

    launcher.clear_failure();
    launcher.report_all(&[(1.0, 0), (1.0, 0)]);
    supervisor.start().await?;
    assert_eq!(launcher.launches().len(), 4);

    let report = supervisor.stop().await?;
    assert_eq!(report.aggregate.worker_count(), 2);
    Ok(())
}
