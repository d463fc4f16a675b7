//! Cloud control plane: credentials, resource manager client and error classification.

pub mod arm;
pub mod control_plane;
pub mod credentials;
pub mod error;
pub mod types;

pub use arm::{role_assignment_name, ArmControlPlane};
pub use control_plane::ControlPlane;
pub use credentials::{AccessToken, AzureCliCredential, CredentialProvider, ServicePrincipalCredential};
pub use error::{CloudError, CloudErrorKind};
pub use types::{MachineIdentity, ManagedCluster, ResourceId, RoleAssignment};
