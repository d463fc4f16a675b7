/// Component installer: download, unpack and place binaries with a version check
use crate::bootstrap::Step;
use crate::process::{run_command, QUERY_TIMEOUT};
use crate::provisioner::ProvisionError;
use crate::retry::{retry_with_backoff, RetryPolicy};
use async_trait::async_trait;
use futures::StreamExt;
use std::io::Read;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

const DOWNLOAD_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(600);

/// How a downloaded artifact lands on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactKind {
    /// A single executable placed at the given path.
    Binary(PathBuf),
    /// A `.tar.gz` whose regular files are flattened into the directory.
    /// `only` limits extraction to entries whose file names are listed.
    TarGz { dest_dir: PathBuf, only: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct Artifact {
    pub url: String,
    pub kind: ArtifactKind,
}

/// How completion is detected.
#[derive(Debug, Clone)]
pub enum VersionCheck {
    /// Run the binary with `args`; done when stdout or stderr contains the version.
    Probe { binary: PathBuf, args: Vec<String> },
    /// Done when the marker file holds exactly the version.
    Marker(PathBuf),
}

/// One component (containerd, runc, CNI plugins, node binaries) at one version.
pub struct BinaryArchiveStep {
    name: String,
    version: String,
    artifacts: Vec<Artifact>,
    check: VersionCheck,
    download_dir: PathBuf,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl BinaryArchiveStep {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        artifacts: Vec<Artifact>,
        check: VersionCheck,
        download_dir: PathBuf,
        retry: RetryPolicy,
    ) -> Result<Self, ProvisionError> {
        let client = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()?;
        Ok(Self {
            name: name.into(),
            version: version.into(),
            artifacts,
            check,
            download_dir,
            retry,
            client,
        })
    }

    async fn install_artifact(
        &self,
        artifact: &Artifact,
        cancel: &CancellationToken,
    ) -> Result<(), ProvisionError> {
        let staging_dir = match &artifact.kind {
            ArtifactKind::Binary(dest) => dest.parent().unwrap_or(Path::new("/")).to_path_buf(),
            ArtifactKind::TarGz { .. } => self.download_dir.clone(),
        };
        std::fs::create_dir_all(&staging_dir)?;

        let op = format!("download {}", artifact.url);
        let client = &self.client;
        let url = artifact.url.as_str();
        let dir = staging_dir.as_path();
        let staged = retry_with_backoff(&self.retry, &op, cancel, move |_| {
            download(client, url, dir, cancel)
        })
        .await?;

        match &artifact.kind {
            ArtifactKind::Binary(dest) => {
                set_executable(staged.as_file())?;
                staged
                    .persist(dest)
                    .map_err(|e| ProvisionError::Io(e.error))?;
                tracing::info!("[BinaryInstall] Installed {}", dest.display());
            }
            ArtifactKind::TarGz { dest_dir, only } => {
                let archive = staged.reopen()?;
                let dest_dir = dest_dir.clone();
                let only = only.clone();
                let installed = tokio::task::spawn_blocking(move || {
                    extract_flat(archive, &dest_dir, &only)
                })
                .await
                .map_err(|e| ProvisionError::Install(format!("extraction task failed: {}", e)))??;
                tracing::info!(
                    "[BinaryInstall] Extracted {} files from {}",
                    installed,
                    artifact.url
                );
            }
        }
        Ok(())
    }
}

/// Stream `url` into a temp file in `dir`.
async fn download(
    client: &reqwest::Client,
    url: &str,
    dir: &Path,
    cancel: &CancellationToken,
) -> Result<tempfile::NamedTempFile, ProvisionError> {
    tracing::info!("[BinaryInstall] Downloading {}", url);
    let response = client.get(url).send().await?;
    let status = response.status();
    if status.is_server_error() || status.as_u16() == 429 {
        return Err(ProvisionError::NotReady(format!("{} returned {}", url, status)));
    }
    if !status.is_success() {
        return Err(ProvisionError::Install(format!("{} returned {}", url, status)));
    }

    let temp = tempfile::Builder::new()
        .prefix(".flex-node-download-")
        .tempfile_in(dir)?;
    let mut file = tokio::fs::File::from_std(temp.reopen()?);

    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;
    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return Err(ProvisionError::Cancelled),
            chunk = stream.next() => chunk,
        };
        let Some(chunk) = chunk else { break };
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.sync_all().await?;

    tracing::debug!("[BinaryInstall] Downloaded {} bytes from {}", written, url);
    Ok(temp)
}

#[cfg(unix)]
fn set_executable(file: &std::fs::File) -> Result<(), ProvisionError> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_executable(_file: &std::fs::File) -> Result<(), ProvisionError> {
    Ok(())
}

/// Unpack every regular file of a gzipped tar into `dest_dir` by file name.
///
/// Each file is staged next to its destination and renamed into place, so a
/// running binary is replaced rather than overwritten.
pub fn extract_flat<R: Read>(
    reader: R,
    dest_dir: &Path,
    only: &[String],
) -> Result<usize, ProvisionError> {
    std::fs::create_dir_all(dest_dir)?;
    let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(reader));
    let mut installed = 0;

    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path()?.to_path_buf();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string)
        else {
            continue;
        };
        if !only.is_empty() && !only.iter().any(|o| o == &file_name) {
            continue;
        }

        let mut staged = tempfile::Builder::new()
            .prefix(".flex-node-")
            .tempfile_in(dest_dir)?;
        std::io::copy(&mut entry, staged.as_file_mut())?;
        set_executable(staged.as_file())?;
        staged
            .persist(dest_dir.join(&file_name))
            .map_err(|e| ProvisionError::Io(e.error))?;
        installed += 1;
    }

    if installed == 0 {
        return Err(ProvisionError::Install(format!(
            "archive contained no matching files for {}",
            dest_dir.display()
        )));
    }
    Ok(installed)
}

#[async_trait]
impl Step for BinaryArchiveStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_completed(&self, cancel: &CancellationToken) -> bool {
        let artifacts_present = self.artifacts.iter().all(|a| match &a.kind {
            ArtifactKind::Binary(dest) => dest.is_file(),
            ArtifactKind::TarGz { dest_dir, only } => {
                only.iter().all(|f| dest_dir.join(f).is_file())
            }
        });
        if !artifacts_present {
            return false;
        }

        match &self.check {
            VersionCheck::Marker(path) => std::fs::read_to_string(path)
                .is_ok_and(|content| content.trim() == self.version),
            VersionCheck::Probe { binary, args } => {
                let program = binary.to_string_lossy();
                let args: Vec<&str> = args.iter().map(String::as_str).collect();
                match run_command(&program, &args, QUERY_TIMEOUT, cancel).await {
                    Ok(out) if out.success() => {
                        out.stdout.contains(&self.version) || out.stderr.contains(&self.version)
                    }
                    _ => false,
                }
            }
        }
    }

    async fn execute(&self, cancel: &CancellationToken) -> Result<(), ProvisionError> {
        tracing::info!(
            "[BinaryInstall] Installing {} {} ({} artifacts)",
            self.name,
            self.version,
            self.artifacts.len()
        );
        for artifact in &self.artifacts {
            self.install_artifact(artifact, cancel).await?;
        }
        if let VersionCheck::Marker(path) = &self.check {
            crate::status::store::write_bytes_atomic(
                path,
                format!("{}\n", self.version).as_bytes(),
                Some(0o644),
            )?;
        }
        Ok(())
    }
}
