//! Embedded node templates, compiled into the binary so a bare VM needs nothing but `flex-node`.

/// Containerd config
pub static CONTAINERD_CONFIG: &str = include_str!("templates/containerd/config.toml.j2");

/// Kubelet config
pub static KUBELET_CONFIG: &str = include_str!("templates/kubelet/kubelet-config.yaml.j2");

/// Systemd units
pub static CONTAINERD_SERVICE: &str = include_str!("templates/systemd/containerd.service.j2");
pub static KUBELET_SERVICE: &str = include_str!("templates/systemd/kubelet.service.j2");

/// All embedded templates as (name, content) pairs for registration with Tera.
pub const ALL_TEMPLATES: &[(&str, &str)] = &[
    ("containerd/config.toml.j2", CONTAINERD_CONFIG),
    ("kubelet/kubelet-config.yaml.j2", KUBELET_CONFIG),
    ("systemd/containerd.service.j2", CONTAINERD_SERVICE),
    ("systemd/kubelet.service.j2", KUBELET_SERVICE),
];
