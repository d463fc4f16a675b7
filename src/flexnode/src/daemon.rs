//! Long-running node supervisor.
//!
//! After the initial build-up the daemon keeps three timers on one task:
//! health sampling writes the status snapshot, the re-provision check reads
//! it back and re-runs build-up when the node has drifted, and the spec
//! refresh rewrites the advisory cluster spec cache. Timer handlers never
//! overlap, so at most one engine run is in flight.
use crate::bootstrap::{run_steps, ExecutionMode, StepEntry};
use crate::config::AgentConfig;
use crate::provisioner::{ProgressReporter, ProvisionError, TracingProgressReporter};
use crate::status::{
    bootstrap_reason, BootstrapReason, ClusterSpecSource, ClusterSpecStore, StatusSampler,
    StatusStore,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaemonSettings {
    pub health_interval: Duration,
    pub check_interval: Duration,
    pub spec_refresh_interval: Duration,
    pub staleness_threshold: Duration,
}

impl DaemonSettings {
    pub fn from_config(agent: &AgentConfig) -> Self {
        Self {
            health_interval: Duration::from_secs(agent.health_interval_secs),
            check_interval: Duration::from_secs(agent.check_interval_secs),
            spec_refresh_interval: Duration::from_secs(agent.spec_refresh_interval_secs),
            staleness_threshold: agent.staleness_threshold(),
        }
    }

    fn validate(&self) -> Result<(), ProvisionError> {
        let intervals = [
            ("health", self.health_interval),
            ("check", self.check_interval),
            ("spec refresh", self.spec_refresh_interval),
        ];
        match intervals.iter().find(|(_, d)| d.is_zero()) {
            Some((name, _)) => Err(ProvisionError::Config(format!(
                "{} interval must be greater than zero",
                name
            ))),
            None => Ok(()),
        }
    }
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self::from_config(&AgentConfig::default())
    }
}

/// What one re-provision check did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Healthy,
    Healed(BootstrapReason),
    HealFailed(BootstrapReason),
    Cancelled,
}

pub struct Daemon {
    settings: DaemonSettings,
    steps: Vec<StepEntry>,
    sampler: Box<dyn StatusSampler>,
    spec_source: Box<dyn ClusterSpecSource>,
    status_store: StatusStore,
    spec_store: ClusterSpecStore,
    reporter: Arc<dyn ProgressReporter>,
}

impl Daemon {
    pub fn new(
        settings: DaemonSettings,
        steps: Vec<StepEntry>,
        sampler: Box<dyn StatusSampler>,
        spec_source: Box<dyn ClusterSpecSource>,
        status_store: StatusStore,
        spec_store: ClusterSpecStore,
    ) -> Self {
        Self {
            settings,
            steps,
            sampler,
            spec_source,
            status_store,
            spec_store,
            reporter: Arc::new(TracingProgressReporter),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn settings(&self) -> &DaemonSettings {
        &self.settings
    }

    /// Run until `cancel` fires. Provisioning and sampling failures are logged,
    /// never returned; only invalid settings end the loop early.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<(), ProvisionError> {
        self.settings.validate()?;
        tracing::info!(
            "[Daemon] Starting (health {:?}, check {:?}, spec refresh {:?}, staleness {:?})",
            self.settings.health_interval,
            self.settings.check_interval,
            self.settings.spec_refresh_interval,
            self.settings.staleness_threshold
        );

        // a snapshot left by a previous process is not evidence of current health
        if let Err(e) = self.status_store.remove() {
            tracing::warn!("[Daemon] Failed to discard previous status file: {}", e);
        }
        self.sample_health(cancel).await;
        self.refresh_spec().await;

        let now = Instant::now();
        let mut health = interval_at(
            now + self.settings.health_interval,
            self.settings.health_interval,
        );
        let mut check = interval_at(
            now + self.settings.check_interval,
            self.settings.check_interval,
        );
        let mut spec = interval_at(
            now + self.settings.spec_refresh_interval,
            self.settings.spec_refresh_interval,
        );
        for timer in [&mut health, &mut check, &mut spec] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = health.tick() => self.sample_health(cancel).await,
                _ = check.tick() => {
                    self.check_and_heal(cancel).await;
                }
                _ = spec.tick() => self.refresh_spec().await,
            }
        }

        tracing::info!("[Daemon] Stopped");
        Ok(())
    }

    /// Take a snapshot and replace the status file with it.
    pub async fn sample_health(&self, cancel: &CancellationToken) {
        let status = self.sampler.sample(cancel).await;
        if cancel.is_cancelled() {
            return;
        }
        match self.status_store.write(&status) {
            Ok(()) => tracing::debug!(
                kubelet_running = status.kubelet_running,
                containerd_running = status.containerd_running,
                arc_connected = status.arc_status.connected,
                "[Daemon] Status snapshot written"
            ),
            Err(e) => tracing::warn!("[Daemon] Failed to write status snapshot: {}", e),
        }
    }

    /// Evaluate the persisted snapshot and re-run build-up when it shows drift.
    pub async fn check_and_heal(&self, cancel: &CancellationToken) -> CheckOutcome {
        let Some(reason) = bootstrap_reason(
            &self.status_store,
            Utc::now(),
            self.settings.staleness_threshold,
        ) else {
            tracing::debug!("[Daemon] Node healthy");
            return CheckOutcome::Healthy;
        };

        tracing::warn!("[Daemon] Node needs bootstrap: {}", reason);
        match run_steps(
            &self.steps,
            ExecutionMode::BuildUp,
            cancel,
            self.reporter.as_ref(),
        )
        .await
        {
            Ok(result) => {
                tracing::info!(
                    "[TIMING] Self-heal completed in {}ms ({} steps)",
                    result.duration.as_millis(),
                    result.step_count
                );
                self.sample_health(cancel).await;
                CheckOutcome::Healed(reason)
            }
            Err(e) if e.source.is_cancelled() => CheckOutcome::Cancelled,
            Err(e) => {
                tracing::error!("[Daemon] Self-heal failed: {}", e);
                // next check starts from a clean slate
                if let Err(e) = self.status_store.remove() {
                    tracing::warn!("[Daemon] Failed to remove status file: {}", e);
                }
                CheckOutcome::HealFailed(reason)
            }
        }
    }

    /// Refresh the advisory cluster spec cache; failures only log.
    pub async fn refresh_spec(&self) {
        match self.spec_source.collect().await {
            Ok(spec) => match self.spec_store.write(&spec) {
                Ok(()) => tracing::debug!(
                    "[Daemon] Cluster spec refreshed ({})",
                    spec.kubernetes_version
                ),
                Err(e) => tracing::warn!("[Daemon] Failed to write cluster spec: {}", e),
            },
            Err(e) => tracing::warn!("[Daemon] Cluster spec refresh failed: {}", e),
        }
    }
}
