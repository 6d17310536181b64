use std::time::Duration;

use crate::support::helpers::{fast_config, init_tracing};
use crate::support::scripted::ScriptedLauncher;
use anyhow::Result;
use stresspool::{HaltReason, Runner, StopConfig};
use tokio::time::{sleep, timeout};

#[tokio::test]
async fn runner_stops_when_token_cancelled() -> Result<()> {
    init_tracing();
    let launcher = ScriptedLauncher::new(2);
    launcher.report_all(&[(12.0, 0), (8.0, 0)]);
    let mut runner = Runner::new(fast_config(2, StopConfig::manual()).build()?, launcher.clone());

    let token = runner.cancellation_token();
    let canceller = tokio::spawn(async move {
        sleep(Duration::from_millis(100)).await;
        token.cancel();
    });

    let report = timeout(Duration::from_secs(5), runner.run_until_ctrl_c()).await??;
    canceller.await?;

    assert_eq!(report.reason, HaltReason::Manual);
    assert_eq!(report.aggregate.total_coverage(), 20.0);
    for id in 0..2 {
        assert_eq!(launcher.worker(id).script().stop_requests, 1);
    }
    assert!(!runner.cancellation_token().is_cancelled());
    assert!(!runner.supervisor().is_running());
    Ok(())
}

#[tokio::test]
async fn runner_returns_when_pool_stops_itself() -> Result<()> {
    init_tracing();
    let launcher = ScriptedLauncher::new(2);
    launcher.report_all(&[(80.0, 0), (80.0, 0)]);
    let mut runner = Runner::new(
        fast_config(2, StopConfig::pool_total(150)).build()?,
        launcher.clone(),
    );

    let report = timeout(Duration::from_secs(5), runner.run_until_ctrl_c()).await??;

    assert!(matches!(
        report.reason,
        HaltReason::PoolThreshold { threshold: 150, .. }
    ));
    assert_eq!(report.aggregate.total_coverage(), 160.0);
    Ok(())
}

#[tokio::test]
async fn runner_surfaces_start_failure() -> Result<()> {
    init_tracing();
    let launcher = ScriptedLauncher::new(2);
    launcher.fail_on(0);
    let mut runner = Runner::new(fast_config(2, StopConfig::manual()).build()?, launcher);

    let err = runner.run_until_ctrl_c().await.unwrap_err();
    assert!(format!("{err:#}").contains("failed to start worker pool"));
    Ok(())
}
