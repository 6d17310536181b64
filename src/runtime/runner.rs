use crate::{StopReport, Supervisor, SupervisorConfig, WorkerLauncher};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Runs one supervised pool and handles OS signals for graceful shutdowns.
pub struct Runner {
    supervisor: Supervisor,
    shutdown: CancellationToken,
}

impl Runner {
    /// Creates a new runner and wires a root [`CancellationToken`] that stops
    /// the pool when cancelled.
    pub fn new(config: SupervisorConfig, launcher: impl WorkerLauncher) -> Self {
        let shutdown = CancellationToken::new();
        let supervisor =
            Supervisor::with_cancellation_token(config, Arc::new(launcher), shutdown.clone());
        Self {
            supervisor,
            shutdown,
        }
    }

    /// Returns a clone of the root shutdown token so external callers can integrate
    /// with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Runs until the pool stops on its own, a Ctrl-C (SIGINT) is received, or
    /// the shutdown token is cancelled elsewhere.
    pub async fn run_until_ctrl_c(&mut self) -> Result<StopReport> {
        self.supervisor
            .start()
            .await
            .context("failed to start worker pool")?;
        tracing::info!("runner started; waiting for the pool to stop or Ctrl-C (SIGINT)");

        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("Ctrl-C received; stopping worker pool");
            }
            _ = self.shutdown.cancelled() => {
                tracing::info!("runner shutdown token cancelled");
            }
            result = self.supervisor.wait_stopped() => {
                if let Err(err) = result {
                    tracing::warn!(error = %err, "worker pool ended abnormally");
                }
            }
        }

        let report = self.supervisor.stop().await;
        self.reinitialize_shutdown_token();
        report
    }

    fn reinitialize_shutdown_token(&mut self) {
        self.shutdown = CancellationToken::new();
        self.supervisor.replace_shutdown_root(self.shutdown.clone());
    }
}
