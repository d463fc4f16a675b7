//! Sampling of local service health and remote cluster metadata.
use super::types::{ArcStatus, ManagedClusterSpec, NodeStatus, UNKNOWN_VERSION};
use crate::arc::{AgentShow, ArcAgent};
use crate::azure::{ControlPlane, ResourceId};
use crate::bootstrap::tasks::systemd;
use crate::process::{run_command, QUERY_TIMEOUT};
use crate::provisioner::ProvisionError;
use crate::AGENT_VERSION;
use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const KUBELET_HEALTHZ: &str = "http://127.0.0.1:10248/healthz";
const HEALTHZ_TIMEOUT: Duration = Duration::from_secs(5);

/// Produces one health snapshot per call. Sampling never fails; anything it
/// cannot observe shows up as a negative signal in the snapshot.
#[async_trait]
pub trait StatusSampler: Send + Sync {
    async fn sample(&self, cancel: &CancellationToken) -> NodeStatus;
}

/// Produces the advisory cluster spec.
#[async_trait]
pub trait ClusterSpecSource: Send + Sync {
    async fn collect(&self) -> Result<ManagedClusterSpec, ProvisionError>;
}

/// First version-looking token of `--version` output, e.g. `v1.30.6` or `1.7.22`.
pub fn parse_version(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| c == ',' || c == '"'))
        .find(|t| {
            let digits = t.strip_prefix('v').unwrap_or(t);
            digits.contains('.') && digits.starts_with(|c: char| c.is_ascii_digit())
        })
        .map(str::to_string)
}

fn arc_status_from(show: &AgentShow) -> ArcStatus {
    ArcStatus {
        registered: !show.resource_id.is_empty(),
        connected: show.is_connected(),
        machine_name: show.resource_name.clone(),
        resource_id: show.resource_id.clone(),
        location: show.location.clone(),
        resource_group: show.resource_group.clone(),
        last_heartbeat: show.last_heartbeat.clone(),
        agent_version: show.agent_version.clone(),
    }
}

/// [`StatusSampler`] backed by the host: binaries, systemd, kubelet healthz and
/// the registration agent.
pub struct StatusCollector {
    bin_dir: PathBuf,
    agent: Arc<dyn ArcAgent>,
    http: reqwest::Client,
}

impl StatusCollector {
    pub fn new(bin_dir: PathBuf, agent: Arc<dyn ArcAgent>) -> Result<Self, ProvisionError> {
        let http = reqwest::Client::builder()
            .timeout(HEALTHZ_TIMEOUT)
            .build()?;
        Ok(Self {
            bin_dir,
            agent,
            http,
        })
    }

    async fn version_of(&self, binary: &str, cancel: &CancellationToken) -> String {
        let path = self.bin_dir.join(binary);
        let program = path.to_string_lossy();
        match run_command(&program, &["--version"], QUERY_TIMEOUT, cancel).await {
            Ok(out) if out.success() => {
                parse_version(&out.stdout).unwrap_or_else(|| UNKNOWN_VERSION.to_string())
            }
            Ok(out) => {
                tracing::debug!("[Status] {} --version failed: {}", binary, out.last_line());
                UNKNOWN_VERSION.to_string()
            }
            Err(e) => {
                tracing::debug!("[Status] {} --version failed: {}", binary, e);
                UNKNOWN_VERSION.to_string()
            }
        }
    }

    async fn kubelet_ready(&self) -> bool {
        match self.http.get(KUBELET_HEALTHZ).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!("[Status] kubelet healthz unreachable: {}", e);
                false
            }
        }
    }

    async fn arc_status(&self, cancel: &CancellationToken) -> ArcStatus {
        match self.agent.show(cancel).await {
            Ok(show) => arc_status_from(&show),
            Err(e) => {
                tracing::debug!("[Status] Registration agent query failed: {}", e);
                ArcStatus::default()
            }
        }
    }
}

#[async_trait]
impl StatusSampler for StatusCollector {
    async fn sample(&self, cancel: &CancellationToken) -> NodeStatus {
        let kubelet_running = systemd::is_active("kubelet", cancel).await;
        let kubelet_ready = kubelet_running && self.kubelet_ready().await;

        NodeStatus {
            kubelet_version: self.version_of("kubelet", cancel).await,
            containerd_version: self.version_of("containerd", cancel).await,
            runc_version: self.version_of("runc", cancel).await,
            kubelet_running,
            kubelet_ready,
            containerd_running: systemd::is_active("containerd", cancel).await,
            arc_status: self.arc_status(cancel).await,
            last_updated: Utc::now(),
            agent_version: AGENT_VERSION.to_string(),
        }
    }
}

/// [`ClusterSpecSource`] reading the target cluster through the control plane.
pub struct ClusterSpecCollector {
    control_plane: Arc<dyn ControlPlane>,
    cluster_id: String,
}

impl ClusterSpecCollector {
    pub fn new(control_plane: Arc<dyn ControlPlane>, cluster_id: impl Into<String>) -> Self {
        Self {
            control_plane,
            cluster_id: cluster_id.into(),
        }
    }
}

#[async_trait]
impl ClusterSpecSource for ClusterSpecCollector {
    async fn collect(&self) -> Result<ManagedClusterSpec, ProvisionError> {
        let cluster = self
            .control_plane
            .get_managed_cluster(&self.cluster_id)
            .await?
            .ok_or_else(|| {
                ProvisionError::Status(format!("cluster {} not found", self.cluster_id))
            })?;
        let id: ResourceId = self.cluster_id.parse()?;

        Ok(ManagedClusterSpec {
            schema_version: ManagedClusterSpec::CURRENT_SCHEMA_VERSION,
            resource_id: cluster.id,
            name: cluster.name,
            resource_group: id.resource_group,
            location: cluster.location,
            kubernetes_version: cluster.kubernetes_version,
            current_kubernetes_version: cluster.current_kubernetes_version,
            fqdn: cluster.fqdn,
            collected_at: Utc::now(),
        })
    }
}
