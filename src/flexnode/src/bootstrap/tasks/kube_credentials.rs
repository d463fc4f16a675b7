/// Fetch the target cluster's kubeconfig for the kubelet
use crate::azure::ControlPlane;
use crate::bootstrap::Step;
use crate::provisioner::ProvisionError;
use crate::status::store::write_bytes_atomic;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Deserialize)]
struct KubeconfigShape {
    #[serde(default)]
    clusters: Vec<serde_yaml::Value>,
}

/// Number of clusters in a kubeconfig document; errors when it does not parse.
pub fn kubeconfig_cluster_count(bytes: &[u8]) -> Result<usize, ProvisionError> {
    let parsed: KubeconfigShape = serde_yaml::from_slice(bytes)
        .map_err(|e| ProvisionError::Status(format!("kubeconfig does not parse: {}", e)))?;
    Ok(parsed.clusters.len())
}

fn usable_kubeconfig(path: &Path) -> bool {
    std::fs::read(path)
        .ok()
        .and_then(|bytes| kubeconfig_cluster_count(&bytes).ok())
        .is_some_and(|clusters| clusters > 0)
}

pub struct KubeCredentialStep {
    control_plane: Arc<dyn ControlPlane>,
    cluster_id: String,
    kubeconfig_path: PathBuf,
}

impl KubeCredentialStep {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        cluster_id: impl Into<String>,
        kubeconfig_path: PathBuf,
    ) -> Self {
        Self {
            control_plane,
            cluster_id: cluster_id.into(),
            kubeconfig_path,
        }
    }
}

#[async_trait]
impl Step for KubeCredentialStep {
    fn name(&self) -> &str {
        "kube-credentials"
    }

    async fn is_completed(&self, _cancel: &CancellationToken) -> bool {
        usable_kubeconfig(&self.kubeconfig_path)
    }

    async fn execute(&self, _cancel: &CancellationToken) -> Result<(), ProvisionError> {
        let kubeconfig = self
            .control_plane
            .list_cluster_user_credentials(&self.cluster_id)
            .await?;
        if kubeconfig_cluster_count(&kubeconfig)? == 0 {
            return Err(ProvisionError::Status(format!(
                "kubeconfig for {} lists no clusters",
                self.cluster_id
            )));
        }
        write_bytes_atomic(&self.kubeconfig_path, &kubeconfig, Some(0o600))?;
        tracing::info!(
            "[KubeCredentials] Wrote kubeconfig to {}",
            self.kubeconfig_path.display()
        );
        Ok(())
    }
}
