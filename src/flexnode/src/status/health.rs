//! Decides whether the node has drifted far enough to re-run build-up.
use super::store::StatusStore;
use super::types::{NodeStatus, UNKNOWN_VERSION};
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// Why a self-heal run is needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapReason {
    StatusMissing,
    StatusUnreadable(String),
    KubeletNotRunning,
    ContainerdNotRunning,
    ArcDisconnected,
    /// Sampling itself is stuck.
    Stale { age_secs: i64 },
    UnknownVersion(&'static str),
}

impl fmt::Display for BootstrapReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootstrapReason::StatusMissing => write!(f, "status file missing"),
            BootstrapReason::StatusUnreadable(e) => write!(f, "status file unreadable: {}", e),
            BootstrapReason::KubeletNotRunning => write!(f, "kubelet not running"),
            BootstrapReason::ContainerdNotRunning => write!(f, "containerd not running"),
            BootstrapReason::ArcDisconnected => write!(f, "arc agent not connected"),
            BootstrapReason::Stale { age_secs } => {
                write!(f, "status snapshot is {}s old", age_secs)
            }
            BootstrapReason::UnknownVersion(component) => {
                write!(f, "{} version unknown", component)
            }
        }
    }
}

/// First unhealthy signal of a parsed snapshot, or `None` when healthy and fresh.
pub fn snapshot_reason(
    status: &NodeStatus,
    now: DateTime<Utc>,
    staleness: Duration,
) -> Option<BootstrapReason> {
    if !status.kubelet_running {
        return Some(BootstrapReason::KubeletNotRunning);
    }
    if !status.containerd_running {
        return Some(BootstrapReason::ContainerdNotRunning);
    }
    if !status.arc_status.connected {
        return Some(BootstrapReason::ArcDisconnected);
    }

    let age = now.signed_duration_since(status.last_updated);
    let limit = chrono::Duration::from_std(staleness).unwrap_or(chrono::Duration::MAX);
    if age > limit {
        return Some(BootstrapReason::Stale {
            age_secs: age.num_seconds(),
        });
    }

    status
        .versions()
        .into_iter()
        .find(|(_, version)| version.is_empty() || *version == UNKNOWN_VERSION)
        .map(|(component, _)| BootstrapReason::UnknownVersion(component))
}

/// Evaluate the persisted snapshot.
pub fn bootstrap_reason(
    store: &StatusStore,
    now: DateTime<Utc>,
    staleness: Duration,
) -> Option<BootstrapReason> {
    match store.read() {
        Ok(None) => Some(BootstrapReason::StatusMissing),
        Err(e) => Some(BootstrapReason::StatusUnreadable(e.to_string())),
        Ok(Some(status)) => snapshot_reason(&status, now, staleness),
    }
}

pub fn needs_bootstrap(store: &StatusStore, now: DateTime<Utc>, staleness: Duration) -> bool {
    bootstrap_reason(store, now, staleness).is_some()
}
