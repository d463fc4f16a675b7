//! Resource manager REST client.
use super::control_plane::ControlPlane;
use super::credentials::CredentialProvider;
use super::error::CloudError;
use super::types::{MachineIdentity, ManagedCluster, ResourceId, RoleAssignment};
use crate::provisioner::ProvisionError;
use async_trait::async_trait;
use base64::Engine;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const HYBRID_COMPUTE_API: &str = "2022-12-27";
const CONTAINER_SERVICE_API: &str = "2024-02-01";
const AUTHORIZATION_API: &str = "2022-04-01";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Deterministic assignment name for (scope, role, principal), so a repeated
/// create hits the same resource instead of producing a duplicate.
pub fn role_assignment_name(scope: &str, role_definition_id: &str, principal_id: &str) -> String {
    let role = role_definition_id
        .rsplit('/')
        .next()
        .unwrap_or(role_definition_id);
    let key = format!(
        "{}|{}|{}",
        scope.trim_end_matches('/'),
        role,
        principal_id
    )
    .to_ascii_lowercase();
    Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes()).to_string()
}

/// [`ControlPlane`] backed by the Azure Resource Manager API.
pub struct ArmControlPlane {
    client: reqwest::Client,
    endpoint: String,
    subscription_id: String,
    machine_resource_group: String,
    credential: Arc<dyn CredentialProvider>,
}

impl ArmControlPlane {
    pub fn new(
        endpoint: impl Into<String>,
        subscription_id: impl Into<String>,
        machine_resource_group: impl Into<String>,
        credential: Arc<dyn CredentialProvider>,
    ) -> Result<Self, ProvisionError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("flex-node/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            subscription_id: subscription_id.into(),
            machine_resource_group: machine_resource_group.into(),
            credential,
        })
    }

    fn token_scope(&self) -> String {
        format!("{}/.default", self.endpoint)
    }

    fn machine_path(&self, name: &str) -> String {
        ResourceId::hybrid_machine(&self.subscription_id, &self.machine_resource_group, name)
            .to_string()
    }

    /// Full role definition id; bare GUIDs are resolved in the scope's subscription.
    fn role_definition_path(&self, scope: &str, role_definition_id: &str) -> String {
        if role_definition_id.starts_with('/') {
            return role_definition_id.to_string();
        }
        let subscription = scope
            .trim_start_matches('/')
            .split('/')
            .nth(1)
            .filter(|_| scope.to_ascii_lowercase().starts_with("/subscriptions/"))
            .unwrap_or(&self.subscription_id);
        format!(
            "/subscriptions/{}/providers/Microsoft.Authorization/roleDefinitions/{}",
            subscription, role_definition_id
        )
    }

    /// Send one request and return the body, turning non-success statuses into [`CloudError`].
    async fn send(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, &str)],
        body: Option<serde_json::Value>,
    ) -> Result<String, ProvisionError> {
        let token = self.credential.token(&self.token_scope()).await?;
        let mut request = self
            .client
            .request(method.clone(), url)
            .bearer_auth(&token.token)
            .query(query);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let started = std::time::Instant::now();
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        tracing::debug!(
            "[ArmClient] {} {} -> {} in {}ms",
            method,
            url,
            status.as_u16(),
            started.elapsed().as_millis()
        );

        if !status.is_success() {
            return Err(CloudError::from_body(status.as_u16(), &text).into());
        }
        Ok(text)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        api_version: &str,
        extra_query: &[(&str, &str)],
        body: Option<serde_json::Value>,
    ) -> Result<T, ProvisionError> {
        let url = format!("{}{}", self.endpoint, path);
        let mut query = vec![("api-version", api_version)];
        query.extend_from_slice(extra_query);
        let text = self.send(method, &url, &query, body).await?;
        let body = if text.trim().is_empty() { "null" } else { text.as_str() };
        Ok(serde_json::from_str(body)?)
    }
}

fn absent_on_not_found<T>(
    result: Result<T, ProvisionError>,
) -> Result<Option<T>, ProvisionError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ProvisionError::Cloud(e)) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

#[derive(Deserialize)]
struct MachineResource {
    id: String,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    identity: Option<MachineIdentityBlock>,
    #[serde(default)]
    properties: Option<MachineProperties>,
    #[serde(default)]
    tags: Option<BTreeMap<String, String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MachineIdentityBlock {
    #[serde(default)]
    principal_id: Option<String>,
}

#[derive(Deserialize)]
struct MachineProperties {
    #[serde(default)]
    status: Option<String>,
}

impl From<MachineResource> for MachineIdentity {
    fn from(m: MachineResource) -> Self {
        Self {
            principal_id: m.identity.and_then(|i| i.principal_id),
            resource_id: m.id,
            location: m.location,
            status: m.properties.and_then(|p| p.status),
            tags: m.tags.unwrap_or_default(),
        }
    }
}

#[derive(Deserialize)]
struct ClusterResource {
    id: String,
    name: String,
    #[serde(default)]
    location: String,
    #[serde(default)]
    properties: ClusterProperties,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ClusterProperties {
    #[serde(default)]
    kubernetes_version: String,
    #[serde(default)]
    current_kubernetes_version: Option<String>,
    #[serde(default)]
    fqdn: Option<String>,
    #[serde(default)]
    aad_profile: Option<AadProfile>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AadProfile {
    #[serde(default)]
    managed: bool,
    #[serde(default, rename = "enableAzureRBAC")]
    enable_azure_rbac: bool,
}

impl From<ClusterResource> for ManagedCluster {
    fn from(c: ClusterResource) -> Self {
        let aad = c.properties.aad_profile;
        Self {
            id: c.id,
            name: c.name,
            location: c.location,
            kubernetes_version: c.properties.kubernetes_version,
            current_kubernetes_version: c.properties.current_kubernetes_version,
            fqdn: c.properties.fqdn,
            aad_managed: aad.as_ref().is_some_and(|a| a.managed),
            azure_rbac_enabled: aad.as_ref().is_some_and(|a| a.enable_azure_rbac),
        }
    }
}

#[derive(Deserialize)]
struct AssignmentResource {
    id: String,
    properties: AssignmentProperties,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignmentProperties {
    role_definition_id: String,
    principal_id: String,
    #[serde(default)]
    scope: String,
}

impl From<AssignmentResource> for RoleAssignment {
    fn from(a: AssignmentResource) -> Self {
        Self {
            id: a.id,
            scope: a.properties.scope,
            role_definition_id: a.properties.role_definition_id,
            principal_id: a.properties.principal_id,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(default)]
    next_link: Option<String>,
}

#[derive(Deserialize)]
struct CredentialResults {
    #[serde(default)]
    kubeconfigs: Vec<CredentialResult>,
}

#[derive(Deserialize)]
struct CredentialResult {
    value: String,
}

#[async_trait]
impl ControlPlane for ArmControlPlane {
    async fn get_machine(&self, name: &str) -> Result<Option<MachineIdentity>, ProvisionError> {
        let path = self.machine_path(name);
        let machine = absent_on_not_found(
            self.call::<MachineResource>(Method::GET, &path, HYBRID_COMPUTE_API, &[], None)
                .await,
        )?;
        Ok(machine.map(MachineIdentity::from))
    }

    async fn delete_machine(&self, name: &str) -> Result<(), ProvisionError> {
        let path = self.machine_path(name);
        absent_on_not_found(
            self.call::<serde_json::Value>(Method::DELETE, &path, HYBRID_COMPUTE_API, &[], None)
                .await,
        )?;
        Ok(())
    }

    async fn get_managed_cluster(
        &self,
        cluster_id: &str,
    ) -> Result<Option<ManagedCluster>, ProvisionError> {
        let cluster = absent_on_not_found(
            self.call::<ClusterResource>(Method::GET, cluster_id, CONTAINER_SERVICE_API, &[], None)
                .await,
        )?;
        Ok(cluster.map(ManagedCluster::from))
    }

    async fn create_role_assignment(
        &self,
        scope: &str,
        role_definition_id: &str,
        principal_id: &str,
    ) -> Result<RoleAssignment, ProvisionError> {
        let name = role_assignment_name(scope, role_definition_id, principal_id);
        let path = format!(
            "{}/providers/Microsoft.Authorization/roleAssignments/{}",
            scope.trim_end_matches('/'),
            name
        );
        let body = json!({
            "properties": {
                "roleDefinitionId": self.role_definition_path(scope, role_definition_id),
                "principalId": principal_id,
                "principalType": "ServicePrincipal",
            }
        });
        let created = self
            .call::<AssignmentResource>(Method::PUT, &path, AUTHORIZATION_API, &[], Some(body))
            .await?;
        Ok(created.into())
    }

    async fn list_role_assignments(
        &self,
        scope: &str,
        principal_id: &str,
    ) -> Result<Vec<RoleAssignment>, ProvisionError> {
        let path = format!(
            "{}/providers/Microsoft.Authorization/roleAssignments",
            scope.trim_end_matches('/')
        );
        let filter = format!("principalId eq '{}'", principal_id);
        let mut page = self
            .call::<Page<AssignmentResource>>(
                Method::GET,
                &path,
                AUTHORIZATION_API,
                &[("$filter", filter.as_str())],
                None,
            )
            .await?;

        let mut assignments: Vec<RoleAssignment> = Vec::new();
        loop {
            assignments.extend(page.value.into_iter().map(RoleAssignment::from));
            let Some(next) = page.next_link else { break };
            let text = self.send(Method::GET, &next, &[], None).await?;
            page = serde_json::from_str(&text)?;
        }
        Ok(assignments)
    }

    async fn delete_role_assignment(&self, assignment_id: &str) -> Result<(), ProvisionError> {
        absent_on_not_found(
            self.call::<serde_json::Value>(
                Method::DELETE,
                assignment_id,
                AUTHORIZATION_API,
                &[],
                None,
            )
            .await,
        )?;
        Ok(())
    }

    async fn list_cluster_user_credentials(
        &self,
        cluster_id: &str,
    ) -> Result<Vec<u8>, ProvisionError> {
        let path = format!(
            "{}/listClusterUserCredential",
            cluster_id.trim_end_matches('/')
        );
        let results = self
            .call::<CredentialResults>(Method::POST, &path, CONTAINER_SERVICE_API, &[], None)
            .await?;
        let first = results.kubeconfigs.into_iter().next().ok_or_else(|| {
            ProvisionError::Status(format!("cluster {} returned no kubeconfigs", cluster_id))
        })?;
        base64::engine::general_purpose::STANDARD
            .decode(first.value.trim())
            .map_err(|e| ProvisionError::Status(format!("kubeconfig is not valid base64: {}", e)))
    }
}
