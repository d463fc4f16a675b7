//! Subcommand bodies. Each returns once its work is done or `cancel` fires.
use crate::plan::{self, Clients};
use anyhow::{Context, Result};
use flexnode::{
    bootstrap_reason, run_steps, ClusterSpecStore, Config, Daemon, DaemonSettings,
    ExecutionMode, StatusStore, StepEntry, TracingProgressReporter,
};
use tokio_util::sync::CancellationToken;

async fn build_up(steps: &[StepEntry], cancel: &CancellationToken) -> Result<()> {
    let result = run_steps(steps, ExecutionMode::BuildUp, cancel, &TracingProgressReporter)
        .await
        .context("bootstrap failed")?;
    tracing::info!(
        "[TIMING] Bootstrap completed in {}ms ({} steps)",
        result.duration.as_millis(),
        result.step_count
    );
    Ok(())
}

pub async fn bootstrap(config: &Config, cancel: &CancellationToken) -> Result<()> {
    let clients = Clients::from_config(config, cancel, true)?;
    let steps = plan::bootstrap_steps(config, &clients)?;
    build_up(&steps, cancel).await
}

/// Build-up once, then supervise until cancelled.
///
/// Only the first build-up may prompt for a device-code login; self-heal runs
/// unattended and fails with an auth error once the cached login is gone.
pub async fn agent(config: &Config, cancel: &CancellationToken) -> Result<()> {
    let clients = Clients::from_config(config, cancel, true)?;
    build_up(&plan::bootstrap_steps(config, &clients)?, cancel).await?;

    let unattended = Clients::from_config(config, cancel, false)?;
    let daemon = Daemon::new(
        DaemonSettings::from_config(&config.agent),
        plan::bootstrap_steps(config, &unattended)?,
        Box::new(plan::status_collector(config, &unattended)?),
        Box::new(plan::spec_collector(config, &unattended)),
        StatusStore::new(&config.paths.status_file),
        ClusterSpecStore::new(&config.paths.spec_file),
    );
    daemon.run(cancel).await?;
    Ok(())
}

/// Best-effort tear-down. Step failures are logged, never returned.
pub async fn unbootstrap(config: &Config, cancel: &CancellationToken) -> Result<()> {
    let clients = Clients::from_config(config, cancel, false)?;
    let steps = plan::unbootstrap_steps(config, &clients)?;
    match run_steps(&steps, ExecutionMode::TearDown, cancel, &TracingProgressReporter).await {
        Ok(result) if result.success => {
            tracing::info!(
                "[TIMING] Unbootstrap completed in {}ms",
                result.duration.as_millis()
            );
        }
        Ok(result) => {
            tracing::warn!(
                "Unbootstrap finished with {} warnings: {}",
                result.failed_steps().count(),
                result.error.unwrap_or_default()
            );
        }
        Err(e) => tracing::warn!("Unbootstrap ended early: {}", e),
    }
    Ok(())
}

/// Print the persisted snapshot and the self-heal verdict.
pub fn status(config: &Config) -> Result<()> {
    let store = StatusStore::new(&config.paths.status_file);
    match store.read()? {
        Some(status) => println!("{}", serde_json::to_string_pretty(&status)?),
        None => println!("No status snapshot at {}", store.path().display()),
    }
    match bootstrap_reason(
        &store,
        chrono::Utc::now(),
        config.agent.staleness_threshold(),
    ) {
        Some(reason) => println!("Needs bootstrap: {}", reason),
        None => println!("Healthy"),
    }
    Ok(())
}

pub fn version_line() -> String {
    format!(
        "flex-node {} ({})",
        flexnode::AGENT_VERSION,
        env!("FLEX_NODE_GIT_COMMIT")
    )
}
