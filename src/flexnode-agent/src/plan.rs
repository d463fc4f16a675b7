//! Builds the ordered step lists and the cloud clients they share.
use flexnode::arc::RegistrationTarget;
use flexnode::bootstrap::tasks::{
    Artifact, ArtifactKind, BinaryArchiveStep, KubeCredentialStep, RemovePathsStep,
    ServiceConfigStep, ServiceStopStep, SystemPrepStep, VersionCheck,
};
use flexnode::config::{release_arch, ComponentConfig, PathsConfig};
use flexnode::status::{ClusterSpecCollector, StatusCollector};
use flexnode::{
    ArcAgent, ArcDeregistrationStep, ArcRegistrationStep, ArmControlPlane, AzcmAgent,
    AzureCliCredential, Config, ControlPlane, CredentialProvider, ProvisionError,
    RegistrationTimings, RetryPolicy, ServicePrincipalCredential, StepEntry, TemplateRenderer,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const NODE_UNITS: [&str; 2] = ["containerd", "kubelet"];
const CONTAINERD_BINARIES: [&str; 3] = ["containerd", "containerd-shim-runc-v2", "ctr"];
const CNI_VERSION_MARKER: &str = ".flex-node-version";

/// Cloud-facing collaborators shared by registration, credentials and status.
#[derive(Clone)]
pub struct Clients {
    pub credential: Arc<dyn CredentialProvider>,
    pub control_plane: Arc<dyn ControlPlane>,
    pub agent: Arc<dyn ArcAgent>,
}

impl Clients {
    /// Service principal when configured, otherwise the Azure CLI login.
    /// `interactive` allows a device-code login when the cached one is unusable.
    pub fn from_config(
        config: &Config,
        cancel: &CancellationToken,
        interactive: bool,
    ) -> Result<Self, ProvisionError> {
        let azure = &config.azure;
        let credential: Arc<dyn CredentialProvider> = match &azure.service_principal {
            Some(sp) => {
                tracing::info!("[Plan] Using service principal {}", sp.client_id);
                Arc::new(ServicePrincipalCredential::new(
                    azure.cloud.authority.as_str(),
                    azure.tenant_id.as_str(),
                    sp.client_id.as_str(),
                    sp.client_secret.as_str(),
                )?)
            }
            None => {
                tracing::info!("[Plan] Using Azure CLI credential");
                let cli = AzureCliCredential::new(cancel.clone());
                Arc::new(if interactive { cli } else { cli.non_interactive() })
            }
        };
        let control_plane: Arc<dyn ControlPlane> = Arc::new(ArmControlPlane::new(
            azure.cloud.resource_manager.as_str(),
            azure.subscription_id.as_str(),
            azure.arc.resource_group.as_str(),
            credential.clone(),
        )?);
        Ok(Self {
            credential,
            control_plane,
            agent: Arc::new(AzcmAgent::default()),
        })
    }
}

fn component_step(
    name: &str,
    component: &ComponentConfig,
    artifact: ArtifactKind,
    check: VersionCheck,
    download_dir: &Path,
    retry: RetryPolicy,
) -> Result<StepEntry, ProvisionError> {
    let step = BinaryArchiveStep::new(
        name,
        component.version.as_str(),
        vec![Artifact {
            url: component.url(release_arch()),
            kind: artifact,
        }],
        check,
        download_dir.to_path_buf(),
        retry,
    )?;
    Ok(StepEntry::plain(step))
}

fn probe(binary: PathBuf) -> VersionCheck {
    VersionCheck::Probe {
        binary,
        args: vec!["--version".to_string()],
    }
}

fn installer_steps(config: &Config) -> Result<Vec<StepEntry>, ProvisionError> {
    let paths = &config.paths;
    let retry = config.retry.download.policy();
    let download_dir = paths.data_dir.join("downloads");
    let arch = release_arch();

    let mut steps = vec![
        component_step(
            "containerd",
            &config.containerd,
            ArtifactKind::TarGz {
                dest_dir: paths.bin_dir.clone(),
                only: CONTAINERD_BINARIES.iter().map(|b| b.to_string()).collect(),
            },
            probe(paths.bin_dir.join("containerd")),
            &download_dir,
            retry.clone(),
        )?,
        component_step(
            "runc",
            &config.runc,
            ArtifactKind::Binary(paths.bin_dir.join("runc")),
            probe(paths.bin_dir.join("runc")),
            &download_dir,
            retry.clone(),
        )?,
        component_step(
            "cni-plugins",
            &config.cni,
            ArtifactKind::TarGz {
                dest_dir: paths.cni_bin_dir.clone(),
                only: Vec::new(),
            },
            VersionCheck::Marker(paths.cni_bin_dir.join(CNI_VERSION_MARKER)),
            &download_dir,
            retry.clone(),
        )?,
    ];

    let kubernetes = &config.kubernetes;
    let artifacts = kubernetes
        .binaries
        .iter()
        .map(|binary| Artifact {
            url: kubernetes
                .url_template
                .replace("{version}", &kubernetes.version)
                .replace("{arch}", arch)
                .replace("{binary}", binary),
            kind: ArtifactKind::Binary(paths.bin_dir.join(binary)),
        })
        .collect();
    steps.push(StepEntry::plain(BinaryArchiveStep::new(
        "kubernetes-binaries",
        kubernetes.version.as_str(),
        artifacts,
        probe(paths.bin_dir.join("kubelet")),
        download_dir,
        retry,
    )?));

    Ok(steps)
}

/// Build-up order: host prep, runtimes, identity, cluster credentials, services.
pub fn bootstrap_steps(
    config: &Config,
    clients: &Clients,
) -> Result<Vec<StepEntry>, ProvisionError> {
    let paths = &config.paths;
    let mut steps = vec![StepEntry::validating(SystemPrepStep::new(
        paths.modules_load_file.clone(),
        paths.sysctl_file.clone(),
    ))];
    steps.extend(installer_steps(config)?);
    steps.push(StepEntry::validating(ArcRegistrationStep::new(
        RegistrationTarget::from_config(config)?,
        clients.credential.clone(),
        clients.control_plane.clone(),
        clients.agent.clone(),
        RegistrationTimings::from_config(&config.retry),
    )));
    steps.push(StepEntry::plain(KubeCredentialStep::new(
        clients.control_plane.clone(),
        config.target_cluster_id(),
        paths.kubeconfig.clone(),
    )));
    let renderer = TemplateRenderer::from_embedded()?;
    steps.push(StepEntry::plain(ServiceConfigStep::from_config(
        config, &renderer,
    )?));
    Ok(steps)
}

/// Files and directories build-up leaves on the host.
pub fn installed_paths(config: &Config) -> Vec<PathBuf> {
    let PathsConfig {
        data_dir,
        bin_dir,
        cni_bin_dir,
        cni_conf_dir,
        containerd_config,
        kubelet_dir,
        kubeconfig,
        modules_load_file,
        sysctl_file,
        ..
    } = &config.paths;

    let mut paths: Vec<PathBuf> = CONTAINERD_BINARIES
        .iter()
        .chain(std::iter::once(&"runc"))
        .map(|b| bin_dir.join(b))
        .collect();
    paths.extend(config.kubernetes.binaries.iter().map(|b| bin_dir.join(b)));
    paths.extend([
        cni_bin_dir.clone(),
        cni_conf_dir.clone(),
        containerd_config.clone(),
        kubeconfig.clone(),
        kubelet_dir.clone(),
        modules_load_file.clone(),
        sysctl_file.clone(),
        data_dir.clone(),
    ]);
    paths
}

/// Tear-down order: stop services, remove the cloud identity, then local files.
pub fn unbootstrap_steps(
    config: &Config,
    clients: &Clients,
) -> Result<Vec<StepEntry>, ProvisionError> {
    Ok(vec![
        StepEntry::plain(ServiceStopStep::new(
            NODE_UNITS.iter().map(|u| u.to_string()).collect(),
            config.paths.systemd_dir.clone(),
        )),
        StepEntry::plain(ArcDeregistrationStep::new(
            RegistrationTarget::from_config(config)?,
            clients.control_plane.clone(),
            clients.agent.clone(),
        )),
        StepEntry::plain(RemovePathsStep::new(
            "remove-node-files",
            installed_paths(config),
        )),
    ])
}

pub fn status_collector(
    config: &Config,
    clients: &Clients,
) -> Result<StatusCollector, ProvisionError> {
    StatusCollector::new(config.paths.bin_dir.clone(), clients.agent.clone())
}

pub fn spec_collector(config: &Config, clients: &Clients) -> ClusterSpecCollector {
    ClusterSpecCollector::new(clients.control_plane.clone(), config.target_cluster_id())
}
