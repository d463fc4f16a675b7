use flexnode::Config;
use flexnode_agent::plan::{self, Clients};
use tokio_util::sync::CancellationToken;

fn config_in(root: &std::path::Path) -> Config {
    let toml = format!(
        r#"
[azure]
subscription_id = "00000000-0000-0000-0000-000000000001"
tenant_id = "00000000-0000-0000-0000-000000000002"

[azure.service_principal]
client_id = "app"
client_secret = "secret"

[azure.arc]
machine_name = "edge-01"
resource_group = "edge-rg"
location = "westus2"

[azure.target_cluster]
resource_id = "/subscriptions/00000000-0000-0000-0000-000000000001/resourceGroups/aks-rg/providers/Microsoft.ContainerService/managedClusters/prod"

[paths]
data_dir = "{root}/var/lib/flex-node"
status_file = "{root}/var/lib/flex-node/status.json"
spec_file = "{root}/var/lib/flex-node/cluster-spec.json"
bin_dir = "{root}/usr/local/bin"
cni_bin_dir = "{root}/opt/cni/bin"
cni_conf_dir = "{root}/etc/cni/net.d"
containerd_config = "{root}/etc/containerd/config.toml"
systemd_dir = "{root}/etc/systemd/system"
kubelet_dir = "{root}/var/lib/kubelet"
kubeconfig = "{root}/var/lib/kubelet/kubeconfig"
modules_load_file = "{root}/etc/modules-load.d/flex-node.conf"
sysctl_file = "{root}/etc/sysctl.d/99-flex-node.conf"
"#,
        root = root.display()
    );
    Config::from_toml_str(&toml).unwrap()
}

fn names(steps: &[flexnode::StepEntry]) -> Vec<&str> {
    steps.iter().map(|s| s.name()).collect()
}

#[tokio::test]
async fn bootstrap_plan_orders_identity_before_credentials_and_services() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let clients = Clients::from_config(&config, &CancellationToken::new(), false).unwrap();

    let steps = plan::bootstrap_steps(&config, &clients).unwrap();
    assert_eq!(
        names(&steps),
        vec![
            "system-prep",
            "containerd",
            "runc",
            "cni-plugins",
            "kubernetes-binaries",
            "arc-registration",
            "kube-credentials",
            "service-config",
        ]
    );
    assert!(steps[0].validator().is_some());
    assert!(steps[5].validator().is_some());
    assert!(steps[6].validator().is_none());
}

#[tokio::test]
async fn unbootstrap_plan_stops_services_before_deregistering() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let clients = Clients::from_config(&config, &CancellationToken::new(), false).unwrap();

    let steps = plan::unbootstrap_steps(&config, &clients).unwrap();
    assert_eq!(
        names(&steps),
        vec!["stop-services", "arc-deregistration", "remove-node-files"]
    );

    let paths = plan::installed_paths(&config);
    for expected in ["usr/local/bin/kubelet", "usr/local/bin/runc", "opt/cni/bin"] {
        assert!(
            paths.contains(&dir.path().join(expected)),
            "missing {}",
            expected
        );
    }
    assert!(paths.iter().all(|p| p.starts_with(dir.path())));
}
