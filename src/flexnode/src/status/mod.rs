pub mod collector;
pub mod health;
pub mod store;
pub mod types;

pub use collector::{
    parse_version, ClusterSpecCollector, ClusterSpecSource, StatusCollector, StatusSampler,
};
pub use health::{bootstrap_reason, needs_bootstrap, snapshot_reason, BootstrapReason};
pub use store::{ClusterSpecStore, StatusStore};
pub use types::{ArcStatus, ManagedClusterSpec, NodeStatus, UNKNOWN_VERSION};
