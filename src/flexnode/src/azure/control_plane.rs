use super::types::{MachineIdentity, ManagedCluster, RoleAssignment};
use crate::provisioner::ProvisionError;
use async_trait::async_trait;

/// Remote resource manager operations needed by registration, status and credentials.
///
/// Reads of missing resources return `Ok(None)`; deletes of missing resources
/// succeed. Every other failure is a [`ProvisionError`], usually
/// [`ProvisionError::Cloud`] carrying the structured error code.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Arc machine resource `name` in the configured registration resource group.
    async fn get_machine(&self, name: &str) -> Result<Option<MachineIdentity>, ProvisionError>;

    async fn delete_machine(&self, name: &str) -> Result<(), ProvisionError>;

    async fn get_managed_cluster(
        &self,
        cluster_id: &str,
    ) -> Result<Option<ManagedCluster>, ProvisionError>;

    /// Create the assignment. Conflicts surface as `AlreadyExists` cloud errors.
    async fn create_role_assignment(
        &self,
        scope: &str,
        role_definition_id: &str,
        principal_id: &str,
    ) -> Result<RoleAssignment, ProvisionError>;

    /// Assignments at `scope` (including inherited ones) held by `principal_id`.
    async fn list_role_assignments(
        &self,
        scope: &str,
        principal_id: &str,
    ) -> Result<Vec<RoleAssignment>, ProvisionError>;

    async fn delete_role_assignment(&self, assignment_id: &str) -> Result<(), ProvisionError>;

    /// Raw kubeconfig bytes of the cluster's user credential.
    async fn list_cluster_user_credentials(
        &self,
        cluster_id: &str,
    ) -> Result<Vec<u8>, ProvisionError>;
}
