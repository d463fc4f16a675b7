/// Tear-down steps: stop node services and remove what build-up placed on disk
use super::systemd;
use crate::bootstrap::Step;
use crate::provisioner::ProvisionError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Stop and disable units, then delete their unit files.
pub struct ServiceStopStep {
    units: Vec<String>,
    systemd_dir: PathBuf,
}

impl ServiceStopStep {
    pub fn new(units: Vec<String>, systemd_dir: PathBuf) -> Self {
        Self { units, systemd_dir }
    }

    fn unit_file(&self, unit: &str) -> PathBuf {
        self.systemd_dir.join(format!("{}.service", unit))
    }
}

#[async_trait]
impl Step for ServiceStopStep {
    fn name(&self) -> &str {
        "stop-services"
    }

    async fn is_completed(&self, cancel: &CancellationToken) -> bool {
        for unit in &self.units {
            if self.unit_file(unit).exists() || systemd::is_active(unit, cancel).await {
                return false;
            }
        }
        true
    }

    async fn execute(&self, cancel: &CancellationToken) -> Result<(), ProvisionError> {
        let mut first_error = None;
        // kubelet before containerd: reverse of start order
        for unit in self.units.iter().rev() {
            if let Err(e) = systemd::disable_now(unit, cancel).await {
                tracing::warn!("[Teardown] Failed to stop {}: {}", unit, e);
                first_error.get_or_insert(e);
            }
            if let Err(e) = remove_path(&self.unit_file(unit)) {
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = systemd::daemon_reload(cancel).await {
            first_error.get_or_insert(e);
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Remove a file or directory tree; absence is success.
pub fn remove_path(path: &Path) -> Result<(), ProvisionError> {
    let result = match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => {
            tracing::info!("[Teardown] Removed {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ProvisionError::Install(format!(
            "failed to remove {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Delete a named set of files and directories.
pub struct RemovePathsStep {
    name: String,
    paths: Vec<PathBuf>,
}

impl RemovePathsStep {
    pub fn new(name: impl Into<String>, paths: Vec<PathBuf>) -> Self {
        Self {
            name: name.into(),
            paths,
        }
    }
}

#[async_trait]
impl Step for RemovePathsStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_completed(&self, _cancel: &CancellationToken) -> bool {
        self.paths
            .iter()
            .all(|p| std::fs::symlink_metadata(p).is_err())
    }

    async fn execute(&self, _cancel: &CancellationToken) -> Result<(), ProvisionError> {
        let failures: Vec<String> = self
            .paths
            .iter()
            .filter_map(|p| remove_path(p).err())
            .map(|e| e.to_string())
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ProvisionError::Install(failures.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn removes_files_and_trees_and_tolerates_absence() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("kubeconfig");
        let tree = dir.path().join("cni");
        std::fs::write(&file, "x").unwrap();
        std::fs::create_dir_all(tree.join("bin")).unwrap();
        std::fs::write(tree.join("bin").join("bridge"), "y").unwrap();

        let step = RemovePathsStep::new(
            "remove-node-files",
            vec![file.clone(), tree.clone(), dir.path().join("never-existed")],
        );
        let cancel = CancellationToken::new();

        assert!(!step.is_completed(&cancel).await);
        step.execute(&cancel).await.unwrap();
        assert!(!file.exists());
        assert!(!tree.exists());
        assert!(step.is_completed(&cancel).await);

        step.execute(&cancel).await.unwrap();
    }
}
