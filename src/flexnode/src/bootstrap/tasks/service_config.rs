/// Render node service configuration and bring the units up
use super::systemd;
use crate::bootstrap::{Step, TemplateRenderer};
use crate::config::Config;
use crate::provisioner::ProvisionError;
use crate::status::store::write_bytes_atomic;
use async_trait::async_trait;
use std::path::PathBuf;
use tera::Context;
use tokio_util::sync::CancellationToken;

const SANDBOX_IMAGE: &str = "mcr.microsoft.com/oss/kubernetes/pause:3.9";

/// A rendered file and its destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFile {
    pub path: PathBuf,
    pub contents: String,
}

/// Writes containerd and kubelet configuration plus their systemd units, then
/// enables them. Files whose contents already match are left untouched.
pub struct ServiceConfigStep {
    files: Vec<RenderedFile>,
    units: Vec<String>,
}

impl ServiceConfigStep {
    pub fn from_config(
        config: &Config,
        renderer: &TemplateRenderer,
    ) -> Result<Self, ProvisionError> {
        let paths = &config.paths;
        let node_labels = config
            .kubernetes
            .node_labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");

        let mut context = Context::new();
        context.insert("bin_dir", &paths.bin_dir.display().to_string());
        context.insert("cni_bin_dir", &paths.cni_bin_dir.display().to_string());
        context.insert("cni_conf_dir", &paths.cni_conf_dir.display().to_string());
        context.insert(
            "containerd_config",
            &paths.containerd_config.display().to_string(),
        );
        context.insert("kubelet_dir", &paths.kubelet_dir.display().to_string());
        context.insert("kubeconfig", &paths.kubeconfig.display().to_string());
        context.insert("node_name", &config.machine_name()?.to_ascii_lowercase());
        context.insert("node_labels", &node_labels);
        context.insert("sandbox_image", SANDBOX_IMAGE);
        context.insert("cluster_dns", &config.kubernetes.cluster_dns);
        context.insert("max_pods", &config.kubernetes.max_pods);

        let render = |template: &str, path: PathBuf| -> Result<RenderedFile, ProvisionError> {
            Ok(RenderedFile {
                path,
                contents: renderer.render(template, &context)?,
            })
        };

        let files = vec![
            render("containerd/config.toml.j2", paths.containerd_config.clone())?,
            render(
                "systemd/containerd.service.j2",
                paths.systemd_dir.join("containerd.service"),
            )?,
            render(
                "kubelet/kubelet-config.yaml.j2",
                paths.kubelet_dir.join("config.yaml"),
            )?,
            render(
                "systemd/kubelet.service.j2",
                paths.systemd_dir.join("kubelet.service"),
            )?,
        ];

        Ok(Self {
            files,
            units: vec!["containerd".to_string(), "kubelet".to_string()],
        })
    }

    pub fn files(&self) -> &[RenderedFile] {
        &self.files
    }

    fn stale_files(&self) -> Vec<&RenderedFile> {
        self.files
            .iter()
            .filter(|f| {
                std::fs::read_to_string(&f.path)
                    .map(|current| current != f.contents)
                    .unwrap_or(true)
            })
            .collect()
    }
}

#[async_trait]
impl Step for ServiceConfigStep {
    fn name(&self) -> &str {
        "service-config"
    }

    async fn is_completed(&self, cancel: &CancellationToken) -> bool {
        if !self.stale_files().is_empty() {
            return false;
        }
        for unit in &self.units {
            if !systemd::is_active(unit, cancel).await {
                return false;
            }
        }
        true
    }

    async fn execute(&self, cancel: &CancellationToken) -> Result<(), ProvisionError> {
        let stale = self.stale_files();
        for file in &stale {
            write_bytes_atomic(&file.path, file.contents.as_bytes(), Some(0o644))?;
            tracing::info!("[ServiceConfig] Wrote {}", file.path.display());
        }

        systemd::daemon_reload(cancel).await?;
        for unit in &self.units {
            systemd::enable_now(unit, cancel).await?;
            // enable --now leaves a running unit on its old configuration
            if !stale.is_empty() {
                systemd::restart(unit, cancel).await?;
            }
        }
        Ok(())
    }
}
