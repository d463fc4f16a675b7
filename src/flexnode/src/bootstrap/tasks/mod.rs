pub mod binary_archive;
pub mod kube_credentials;
pub mod service_config;
pub mod system_prep;
pub mod systemd;
pub mod teardown;

pub use binary_archive::{Artifact, ArtifactKind, BinaryArchiveStep, VersionCheck};
pub use kube_credentials::KubeCredentialStep;
pub use service_config::ServiceConfigStep;
pub use system_prep::SystemPrepStep;
pub use teardown::{RemovePathsStep, ServiceStopStep};
