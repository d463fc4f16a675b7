//! flexnode crate
//!
//! Turns a Linux VM into a managed cluster worker node and keeps it that way.
//! It combines the step engine (bootstrap), identity registration against the
//! cloud control plane (arc, azure), node health sampling (status) and the
//! self-healing supervisor (daemon).
//! Nothing here reads ambient configuration: every component is built from a `Config` value.

pub mod config;
pub mod process;
pub mod progress;
pub mod provisioner;
pub mod retry;

pub use config::Config;
pub use progress::BootstrapProgress;
pub use provisioner::{ProgressReporter, ProvisionError, TracingProgressReporter};
pub use retry::{poll_until, retry_with_backoff, RetryPolicy};

// Cloud control plane (credentials, resource manager client)
pub mod azure;
pub use azure::{
    AccessToken, ArmControlPlane, AzureCliCredential, CloudError, CloudErrorKind, ControlPlane,
    CredentialProvider, ResourceId, ServicePrincipalCredential,
};

// Machine identity registration and role propagation
pub mod arc;
pub use arc::{
    required_roles, ArcAgent, ArcDeregistrationStep, ArcRegistrationStep, AzcmAgent,
    RegistrationTimings, RoleRequirement,
};

// Bootstrap (step abstraction, engine, installer steps)
pub mod bootstrap;
pub use bootstrap::{
    run_steps, ExecutionMode, ExecutionResult, Step, StepEntry, StepResult, StepRunError,
    TemplateRenderer, ValidatingStep,
};

// Node health snapshot and persisted state
pub mod status;
pub use status::{
    bootstrap_reason, needs_bootstrap, ArcStatus, BootstrapReason, ClusterSpecCollector,
    ClusterSpecSource, ClusterSpecStore, ManagedClusterSpec, NodeStatus, StatusCollector,
    StatusSampler, StatusStore,
};

// Long-running supervisor
pub mod daemon;
pub use daemon::{CheckOutcome, Daemon, DaemonSettings};

/// Version reported in status snapshots and by the CLI.
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");
