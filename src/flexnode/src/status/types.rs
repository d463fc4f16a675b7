//! Snapshot and cache file formats.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Version string recorded when a component could not be queried.
pub const UNKNOWN_VERSION: &str = "unknown";

/// Health snapshot of this node, rebuilt on every sampling tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub kubelet_version: String,
    pub containerd_version: String,
    pub runc_version: String,
    pub kubelet_running: bool,
    pub kubelet_ready: bool,
    pub containerd_running: bool,
    pub arc_status: ArcStatus,
    pub last_updated: DateTime<Utc>,
    pub agent_version: String,
}

impl NodeStatus {
    pub fn versions(&self) -> [(&'static str, &str); 3] {
        [
            ("kubelet", self.kubelet_version.as_str()),
            ("containerd", self.containerd_version.as_str()),
            ("runc", self.runc_version.as_str()),
        ]
    }
}

/// Identity-connection state as reported by the registration agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArcStatus {
    pub registered: bool,
    pub connected: bool,
    #[serde(default)]
    pub machine_name: String,
    #[serde(default)]
    pub resource_id: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub resource_group: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<String>,
    #[serde(default)]
    pub agent_version: String,
}

/// Advisory cache of the target cluster's descriptive metadata.
///
/// Fields are added over time; readers must tolerate unknown and missing ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterSpec {
    pub schema_version: u32,
    pub resource_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub resource_group: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub kubernetes_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_kubernetes_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fqdn: Option<String>,
    pub collected_at: DateTime<Utc>,
}

impl ManagedClusterSpec {
    /// Bumped on incompatible format changes only.
    pub const CURRENT_SCHEMA_VERSION: u32 = 1;
}
