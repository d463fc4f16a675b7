//! Machine identity registration and access propagation as provisioning steps.
//!
//! Build-up runs: authenticate, register the machine, check the target
//! cluster's access model, assign roles, then wait until the authorization
//! system reports them. Every phase that depends on replication is bounded by
//! [`RegistrationTimings`] and honours cancellation.
use super::agent::{ArcAgent, ConnectRequest};
use super::roles::{assign_roles, remove_roles, required_roles, wait_for_permissions, RoleRequirement};
use crate::azure::{ControlPlane, CredentialProvider, MachineIdentity, ResourceId};
use crate::bootstrap::{Step, ValidatingStep};
use crate::config::{Config, RetryConfig};
use crate::provisioner::ProvisionError;
use crate::retry::{retry_with_backoff, RetryPolicy};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Retry and polling bounds of the registration protocol.
#[derive(Debug, Clone)]
pub struct RegistrationTimings {
    /// Until the registered machine is visible with a principal id.
    pub registration: RetryPolicy,
    /// Per role, while the principal replicates into the authorization system.
    pub role_assignment: RetryPolicy,
    pub permission_interval: Duration,
    pub permission_deadline: Duration,
}

impl RegistrationTimings {
    pub fn from_config(retry: &RetryConfig) -> Self {
        Self {
            registration: retry.registration.policy(),
            role_assignment: retry.role_assignment.policy(),
            permission_interval: Duration::from_secs(retry.permission_poll_interval_secs),
            permission_deadline: Duration::from_secs(retry.permission_deadline_secs),
        }
    }
}

/// Identifiers of the machine being registered and the cluster it joins.
#[derive(Debug, Clone)]
pub struct RegistrationTarget {
    pub machine_name: String,
    pub subscription_id: String,
    pub tenant_id: String,
    pub resource_group: String,
    pub location: String,
    pub cloud: String,
    pub tags: BTreeMap<String, String>,
    pub cluster_id: String,
    /// OAuth scope of the resource manager.
    pub token_scope: String,
}

impl RegistrationTarget {
    pub fn from_config(config: &Config) -> Result<Self, ProvisionError> {
        Ok(Self {
            machine_name: config.machine_name()?,
            subscription_id: config.azure.subscription_id.clone(),
            tenant_id: config.azure.tenant_id.clone(),
            resource_group: config.azure.arc.resource_group.clone(),
            location: config.azure.arc.location.clone(),
            cloud: config.azure.cloud.name.clone(),
            tags: config.azure.arc.tags.clone(),
            cluster_id: config.target_cluster_id().to_string(),
            token_scope: format!(
                "{}/.default",
                config.azure.cloud.resource_manager.trim_end_matches('/')
            ),
        })
    }
}

/// Registers this machine and grants its identity access to the target cluster.
pub struct ArcRegistrationStep {
    target: RegistrationTarget,
    roles: Vec<RoleRequirement>,
    credential: Arc<dyn CredentialProvider>,
    control_plane: Arc<dyn ControlPlane>,
    agent: Arc<dyn ArcAgent>,
    timings: RegistrationTimings,
}

impl ArcRegistrationStep {
    pub fn new(
        target: RegistrationTarget,
        credential: Arc<dyn CredentialProvider>,
        control_plane: Arc<dyn ControlPlane>,
        agent: Arc<dyn ArcAgent>,
        timings: RegistrationTimings,
    ) -> Self {
        let roles = required_roles(&target.cluster_id);
        Self {
            target,
            roles,
            credential,
            control_plane,
            agent,
            timings,
        }
    }

    async fn authenticate(&self) -> Result<String, ProvisionError> {
        match self.credential.token(&self.target.token_scope).await {
            Ok(token) => Ok(token.token),
            Err(e @ (ProvisionError::Auth(_) | ProvisionError::Cancelled)) => Err(e),
            Err(e) => Err(ProvisionError::Auth(e.to_string())),
        }
    }

    async fn agent_connected(&self, cancel: &CancellationToken) -> bool {
        match self.agent.show(cancel).await {
            Ok(show) => show.is_connected(),
            Err(e) => {
                tracing::debug!("[ArcRegistration] Agent status unavailable: {}", e);
                false
            }
        }
    }

    /// Connect if needed, then wait for the machine resource to expose a principal id.
    async fn register_machine(
        &self,
        access_token: String,
        cancel: &CancellationToken,
    ) -> Result<MachineIdentity, ProvisionError> {
        let existing = self.control_plane.get_machine(&self.target.machine_name).await?;
        let connected = self.agent_connected(cancel).await;

        if existing.is_none() || !connected {
            let request = ConnectRequest {
                machine_name: self.target.machine_name.clone(),
                subscription_id: self.target.subscription_id.clone(),
                tenant_id: self.target.tenant_id.clone(),
                resource_group: self.target.resource_group.clone(),
                location: self.target.location.clone(),
                cloud: self.target.cloud.clone(),
                tags: self.target.tags.clone(),
                access_token,
            };
            self.agent.connect(&request, cancel).await?;
        } else {
            tracing::info!(
                "[ArcRegistration] Machine {} already registered and connected",
                self.target.machine_name
            );
        }

        let control_plane = self.control_plane.as_ref();
        let name = self.target.machine_name.as_str();
        retry_with_backoff(
            &self.timings.registration,
            "machine identity visible",
            cancel,
            move |_attempt| async move {
                match control_plane.get_machine(name).await? {
                    Some(machine) if machine.resolved_principal().is_some() => Ok(machine),
                    Some(_) => Err(ProvisionError::NotReady(format!(
                        "machine {} has no principal id yet",
                        name
                    ))),
                    None => Err(ProvisionError::NotReady(format!(
                        "machine {} not visible yet",
                        name
                    ))),
                }
            },
        )
        .await
    }

    /// The cluster must use managed AAD with Azure RBAC, or the assigned roles grant nothing.
    async fn check_cluster(&self) -> Result<(), ProvisionError> {
        let cluster = self
            .control_plane
            .get_managed_cluster(&self.target.cluster_id)
            .await?
            .ok_or_else(|| {
                ProvisionError::Validation(format!(
                    "target cluster {} not found",
                    self.target.cluster_id
                ))
            })?;
        if !cluster.aad_managed || !cluster.azure_rbac_enabled {
            return Err(ProvisionError::Validation(format!(
                "cluster {} must have managed AAD and Azure RBAC enabled (aad: {}, azure rbac: {})",
                cluster.name, cluster.aad_managed, cluster.azure_rbac_enabled
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Step for ArcRegistrationStep {
    fn name(&self) -> &str {
        "arc-registration"
    }

    /// Both remote signals must agree; no local record is trusted.
    async fn is_completed(&self, cancel: &CancellationToken) -> bool {
        if !self.agent_connected(cancel).await {
            return false;
        }
        match self.control_plane.get_machine(&self.target.machine_name).await {
            Ok(Some(machine)) => machine.resolved_principal().is_some(),
            Ok(None) => false,
            Err(e) => {
                tracing::debug!("[ArcRegistration] Machine lookup failed: {}", e);
                false
            }
        }
    }

    async fn execute(&self, cancel: &CancellationToken) -> Result<(), ProvisionError> {
        let started = std::time::Instant::now();

        let access_token = self.authenticate().await?;
        tracing::info!("[ArcRegistration] Authenticated");

        let machine = self.register_machine(access_token, cancel).await?;
        let principal = machine
            .resolved_principal()
            .map(str::to_string)
            .ok_or_else(|| ProvisionError::NotReady("principal id missing".to_string()))?;
        tracing::info!(
            "[ArcRegistration] Machine {} has principal {}",
            machine.resource_id,
            principal
        );

        self.check_cluster().await?;

        assign_roles(
            self.control_plane.as_ref(),
            &principal,
            &self.roles,
            &self.timings.role_assignment,
            cancel,
        )
        .await?;

        wait_for_permissions(
            self.control_plane.as_ref(),
            &principal,
            &self.roles,
            self.timings.permission_interval,
            self.timings.permission_deadline,
            cancel,
        )
        .await?;

        tracing::info!(
            "[TIMING] Arc registration completed in {}ms",
            started.elapsed().as_millis()
        );
        Ok(())
    }
}

#[async_trait]
impl ValidatingStep for ArcRegistrationStep {
    async fn validate(&self, _cancel: &CancellationToken) -> Result<(), ProvisionError> {
        if self.target.machine_name.trim().is_empty() {
            return Err(ProvisionError::Config("machine name is empty".to_string()));
        }
        let cluster: ResourceId = self.target.cluster_id.parse()?;
        tracing::debug!("[ArcRegistration] Target cluster {}", cluster.name);
        Ok(())
    }
}

/// Reverse of [`ArcRegistrationStep`]: remote cleanup first, then local agent state.
pub struct ArcDeregistrationStep {
    target: RegistrationTarget,
    roles: Vec<RoleRequirement>,
    control_plane: Arc<dyn ControlPlane>,
    agent: Arc<dyn ArcAgent>,
}

impl ArcDeregistrationStep {
    pub fn new(
        target: RegistrationTarget,
        control_plane: Arc<dyn ControlPlane>,
        agent: Arc<dyn ArcAgent>,
    ) -> Self {
        let roles = required_roles(&target.cluster_id);
        Self {
            target,
            roles,
            control_plane,
            agent,
        }
    }
}

#[async_trait]
impl Step for ArcDeregistrationStep {
    fn name(&self) -> &str {
        "arc-deregistration"
    }

    async fn is_completed(&self, cancel: &CancellationToken) -> bool {
        let machine_gone = matches!(
            self.control_plane.get_machine(&self.target.machine_name).await,
            Ok(None)
        );
        let agent_connected = matches!(self.agent.show(cancel).await, Ok(show) if show.is_connected());
        machine_gone && !agent_connected
    }

    async fn execute(&self, cancel: &CancellationToken) -> Result<(), ProvisionError> {
        let mut first_error: Option<ProvisionError> = None;
        let name = self.target.machine_name.as_str();

        match self.control_plane.get_machine(name).await {
            Ok(Some(machine)) => {
                if let Some(principal) = machine.resolved_principal() {
                    if let Err(e) =
                        remove_roles(self.control_plane.as_ref(), principal, &self.roles).await
                    {
                        tracing::warn!("[ArcDeregistration] Role cleanup incomplete: {}", e);
                        first_error.get_or_insert(e);
                    }
                }
                match self.control_plane.delete_machine(name).await {
                    Ok(()) => tracing::info!("[ArcDeregistration] Deleted machine {}", name),
                    Err(e) => {
                        tracing::warn!("[ArcDeregistration] Failed to delete machine {}: {}", name, e);
                        first_error.get_or_insert(e);
                    }
                }
            }
            Ok(None) => tracing::info!("[ArcDeregistration] Machine {} already absent", name),
            Err(e) => {
                tracing::warn!("[ArcDeregistration] Machine lookup failed: {}", e);
                first_error.get_or_insert(e);
            }
        }

        match self.agent.show(cancel).await {
            Ok(show) if show.is_connected() || !show.resource_name.is_empty() => {
                if let Err(e) = self.agent.disconnect(cancel).await {
                    tracing::warn!("[ArcDeregistration] Local disconnect failed: {}", e);
                    first_error.get_or_insert(e);
                }
            }
            Ok(_) => tracing::info!("[ArcDeregistration] Agent holds no registration"),
            Err(e) => tracing::info!("[ArcDeregistration] Agent unavailable, skipping disconnect: {}", e),
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
