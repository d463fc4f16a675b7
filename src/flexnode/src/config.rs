/// Node provisioner configuration
/// Loaded once from flex-node TOML and passed by reference into every component
use crate::azure::ResourceId;
use crate::provisioner::ProvisionError;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// System-wide config location
pub const SYSTEM_CONFIG_PATH: &str = "/etc/flex-node/config.toml";
/// Working-directory fallback
pub const LOCAL_CONFIG_PATH: &str = "flex-node.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub azure: AzureConfig,

    #[serde(default)]
    pub kubernetes: KubernetesConfig,

    #[serde(default = "ComponentConfig::containerd")]
    pub containerd: ComponentConfig,

    #[serde(default = "ComponentConfig::runc")]
    pub runc: ComponentConfig,

    #[serde(default = "ComponentConfig::cni")]
    pub cni: ComponentConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

impl Config {
    /// Load from an explicit path, else the system path, else the working directory.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ProvisionError> {
        let candidates: Vec<PathBuf> = match explicit {
            Some(path) => vec![path.to_path_buf()],
            None => vec![PathBuf::from(SYSTEM_CONFIG_PATH), PathBuf::from(LOCAL_CONFIG_PATH)],
        };

        for path in &candidates {
            if !path.exists() {
                continue;
            }
            let content = std::fs::read_to_string(path).map_err(|e| {
                ProvisionError::Config(format!("Failed to read config file {:?}: {}", path, e))
            })?;
            let config = Self::from_toml_str(&content).map_err(|e| match e {
                ProvisionError::Config(msg) => {
                    ProvisionError::Config(format!("{:?}: {}", path, msg))
                }
                other => other,
            })?;
            tracing::info!("[Config] Loaded configuration from {:?}", path);
            return Ok(config);
        }

        Err(ProvisionError::Config(format!(
            "No configuration file found (tried {})",
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ProvisionError> {
        let config: Config = toml::from_str(content)
            .map_err(|e| ProvisionError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject missing identifiers and malformed resource ids.
    pub fn validate(&self) -> Result<(), ProvisionError> {
        let required = [
            ("azure.subscription_id", &self.azure.subscription_id),
            ("azure.tenant_id", &self.azure.tenant_id),
            ("azure.arc.resource_group", &self.azure.arc.resource_group),
            ("azure.arc.location", &self.azure.arc.location),
            ("kubernetes.version", &self.kubernetes.version),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ProvisionError::Config(format!("{} is required", key)));
            }
        }

        let cluster: ResourceId = self.azure.target_cluster.resource_id.parse()?;
        if !cluster
            .provider
            .eq_ignore_ascii_case("Microsoft.ContainerService")
            || !cluster.resource_type.eq_ignore_ascii_case("managedClusters")
        {
            return Err(ProvisionError::Config(format!(
                "azure.target_cluster.resource_id is not a managed cluster: {}",
                cluster
            )));
        }

        if let Some(sp) = &self.azure.service_principal {
            if sp.client_id.trim().is_empty() || sp.client_secret.is_empty() {
                return Err(ProvisionError::Config(
                    "azure.service_principal needs client_id and client_secret".to_string(),
                ));
            }
        }

        if self.agent.staleness_threshold_secs == 0 {
            return Err(ProvisionError::Config(
                "agent.staleness_threshold_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Configured machine name, or the host name.
    pub fn machine_name(&self) -> Result<String, ProvisionError> {
        if let Some(name) = self.azure.arc.machine_name.as_deref() {
            if !name.trim().is_empty() {
                return Ok(name.to_string());
            }
        }
        host_name()
    }

    pub fn target_cluster_id(&self) -> &str {
        &self.azure.target_cluster.resource_id
    }
}

#[cfg(target_os = "linux")]
fn host_name() -> Result<String, ProvisionError> {
    nix::unistd::gethostname()
        .map_err(|e| ProvisionError::Config(format!("Failed to read host name: {}", e)))?
        .into_string()
        .map_err(|_| ProvisionError::Config("Host name is not valid UTF-8".to_string()))
}

#[cfg(not(target_os = "linux"))]
fn host_name() -> Result<String, ProvisionError> {
    std::env::var("HOSTNAME")
        .map_err(|_| ProvisionError::Config("azure.arc.machine_name is required".to_string()))
}

/// Cloud identifiers and credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureConfig {
    pub subscription_id: String,
    pub tenant_id: String,

    #[serde(default)]
    pub cloud: CloudEndpoints,

    /// Static service principal; when absent the cached Azure CLI login is used
    #[serde(default)]
    pub service_principal: Option<ServicePrincipalConfig>,

    pub arc: ArcConfig,

    pub target_cluster: TargetClusterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudEndpoints {
    /// Cloud name passed to the registration agent
    #[serde(default = "default_cloud_name")]
    pub name: String,
    #[serde(default = "default_resource_manager")]
    pub resource_manager: String,
    #[serde(default = "default_authority")]
    pub authority: String,
}

fn default_cloud_name() -> String {
    "AzureCloud".to_string()
}

fn default_resource_manager() -> String {
    "https://management.azure.com".to_string()
}

fn default_authority() -> String {
    "https://login.microsoftonline.com".to_string()
}

impl Default for CloudEndpoints {
    fn default() -> Self {
        Self {
            name: default_cloud_name(),
            resource_manager: default_resource_manager(),
            authority: default_authority(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ServicePrincipalConfig {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for ServicePrincipalConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServicePrincipalConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .finish()
    }
}

/// Machine registration parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArcConfig {
    /// Defaults to the host name
    #[serde(default)]
    pub machine_name: Option<String>,
    pub resource_group: String,
    pub location: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetClusterConfig {
    pub resource_id: String,
    #[serde(default)]
    pub location: Option<String>,
}

/// Kubernetes node binaries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubernetesConfig {
    #[serde(default = "default_kubernetes_version")]
    pub version: String,
    /// `{version}`, `{arch}` and `{binary}` are substituted
    #[serde(default = "default_kubernetes_url")]
    pub url_template: String,
    #[serde(default = "default_kube_binaries")]
    pub binaries: Vec<String>,
    #[serde(default)]
    pub node_labels: BTreeMap<String, String>,
    #[serde(default = "default_max_pods")]
    pub max_pods: u32,
    #[serde(default = "default_cluster_dns")]
    pub cluster_dns: String,
}

fn default_kubernetes_version() -> String {
    "1.30.6".to_string()
}

fn default_kubernetes_url() -> String {
    "https://dl.k8s.io/release/v{version}/bin/linux/{arch}/{binary}".to_string()
}

fn default_kube_binaries() -> Vec<String> {
    vec!["kubelet".to_string(), "kubectl".to_string()]
}

fn default_max_pods() -> u32 {
    110
}

fn default_cluster_dns() -> String {
    "10.0.0.10".to_string()
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            version: default_kubernetes_version(),
            url_template: default_kubernetes_url(),
            binaries: default_kube_binaries(),
            node_labels: BTreeMap::new(),
            max_pods: default_max_pods(),
            cluster_dns: default_cluster_dns(),
        }
    }
}

/// Version and download location of one runtime component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentConfig {
    pub version: String,
    /// `{version}` and `{arch}` are substituted
    pub url_template: String,
}

impl ComponentConfig {
    pub fn containerd() -> Self {
        Self {
            version: "1.7.22".to_string(),
            url_template: "https://github.com/containerd/containerd/releases/download/v{version}/containerd-{version}-linux-{arch}.tar.gz".to_string(),
        }
    }

    pub fn runc() -> Self {
        Self {
            version: "1.1.14".to_string(),
            url_template:
                "https://github.com/opencontainers/runc/releases/download/v{version}/runc.{arch}"
                    .to_string(),
        }
    }

    pub fn cni() -> Self {
        Self {
            version: "1.5.1".to_string(),
            url_template: "https://github.com/containernetworking/plugins/releases/download/v{version}/cni-plugins-linux-{arch}-v{version}.tgz".to_string(),
        }
    }

    pub fn url(&self, arch: &str) -> String {
        self.url_template
            .replace("{version}", &self.version)
            .replace("{arch}", arch)
    }
}

/// Host filesystem layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    pub status_file: PathBuf,
    pub spec_file: PathBuf,
    pub bin_dir: PathBuf,
    pub cni_bin_dir: PathBuf,
    pub cni_conf_dir: PathBuf,
    pub containerd_config: PathBuf,
    pub systemd_dir: PathBuf,
    pub kubelet_dir: PathBuf,
    pub kubeconfig: PathBuf,
    pub modules_load_file: PathBuf,
    pub sysctl_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/flex-node"),
            status_file: PathBuf::from("/var/lib/flex-node/status.json"),
            spec_file: PathBuf::from("/var/lib/flex-node/cluster-spec.json"),
            bin_dir: PathBuf::from("/usr/local/bin"),
            cni_bin_dir: PathBuf::from("/opt/cni/bin"),
            cni_conf_dir: PathBuf::from("/etc/cni/net.d"),
            containerd_config: PathBuf::from("/etc/containerd/config.toml"),
            systemd_dir: PathBuf::from("/etc/systemd/system"),
            kubelet_dir: PathBuf::from("/var/lib/kubelet"),
            kubeconfig: PathBuf::from("/var/lib/kubelet/kubeconfig"),
            modules_load_file: PathBuf::from("/etc/modules-load.d/flex-node.conf"),
            sysctl_file: PathBuf::from("/etc/sysctl.d/99-flex-node.conf"),
        }
    }
}

/// Daemon tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub log_level: String,
    pub health_interval_secs: u64,
    pub check_interval_secs: u64,
    pub spec_refresh_interval_secs: u64,
    pub staleness_threshold_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            health_interval_secs: 30,
            check_interval_secs: 120,
            spec_refresh_interval_secs: 600,
            staleness_threshold_secs: 300,
        }
    }
}

impl AgentConfig {
    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_secs(self.staleness_threshold_secs)
    }
}

/// One backoff policy as written in TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
    #[serde(default)]
    pub jitter: f64,
}

impl BackoffConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.max_attempts,
        )
        .with_jitter(self.jitter)
    }
}

/// Retry bounds of the registration protocol
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Waiting for the registered machine to become visible with a principal
    pub registration: BackoffConfig,
    /// Per-role create attempts while the principal replicates
    pub role_assignment: BackoffConfig,
    pub permission_poll_interval_secs: u64,
    pub permission_deadline_secs: u64,
    /// Binary downloads
    pub download: BackoffConfig,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            registration: BackoffConfig {
                base_delay_ms: 2_000,
                max_delay_ms: 30_000,
                max_attempts: 10,
                jitter: 0.1,
            },
            role_assignment: BackoffConfig {
                base_delay_ms: 5_000,
                max_delay_ms: 60_000,
                max_attempts: 5,
                jitter: 0.1,
            },
            permission_poll_interval_secs: 10,
            permission_deadline_secs: 600,
            download: BackoffConfig {
                base_delay_ms: 1_000,
                max_delay_ms: 30_000,
                max_attempts: 3,
                jitter: 0.0,
            },
        }
    }
}

/// Map the compile-time architecture onto release artifact naming.
pub fn release_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[azure]
subscription_id = "00000000-0000-0000-0000-000000000001"
tenant_id = "00000000-0000-0000-0000-000000000002"

[azure.arc]
machine_name = "edge-01"
resource_group = "rg-arc"
location = "westus2"

[azure.target_cluster]
resource_id = "/subscriptions/00000000-0000-0000-0000-000000000001/resourceGroups/rg-aks/providers/Microsoft.ContainerService/managedClusters/prod"
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = Config::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.machine_name().unwrap(), "edge-01");
        assert_eq!(config.agent.health_interval_secs, 30);
        assert_eq!(config.agent.staleness_threshold(), Duration::from_secs(300));
        assert_eq!(config.retry.role_assignment.max_attempts, 5);
        assert!(config.azure.service_principal.is_none());
        assert_eq!(
            config.paths.status_file,
            PathBuf::from("/var/lib/flex-node/status.json")
        );
    }

    #[test]
    fn rejects_non_cluster_target() {
        let broken = MINIMAL.replace("managedClusters", "virtualMachines");
        assert!(matches!(
            Config::from_toml_str(&broken),
            Err(ProvisionError::Config(_))
        ));
    }

    #[test]
    fn rejects_missing_identifiers() {
        let broken = MINIMAL.replace(
            "tenant_id = \"00000000-0000-0000-0000-000000000002\"",
            "tenant_id = \"\"",
        );
        let err = Config::from_toml_str(&broken).unwrap_err();
        assert!(err.to_string().contains("azure.tenant_id"));
    }

    #[test]
    fn component_url_substitutes_placeholders() {
        let url = ComponentConfig::cni().url("arm64");
        assert_eq!(
            url,
            "https://github.com/containernetworking/plugins/releases/download/v1.5.1/cni-plugins-linux-arm64-v1.5.1.tgz"
        );
    }

    #[test]
    fn secret_is_not_debug_printed() {
        let sp = ServicePrincipalConfig {
            client_id: "app".into(),
            client_secret: "hunter2".into(),
        };
        assert!(!format!("{:?}", sp).contains("hunter2"));
    }
}
