//! Resource types read from the control plane.
use crate::provisioner::ProvisionError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Parsed `/subscriptions/{sub}/resourceGroups/{rg}/providers/{ns}/{type}/{name}` id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId {
    pub subscription_id: String,
    pub resource_group: String,
    pub provider: String,
    pub resource_type: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
        provider: impl Into<String>,
        resource_type: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            provider: provider.into(),
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }

    /// Id of an Arc machine resource.
    pub fn hybrid_machine(subscription_id: &str, resource_group: &str, name: &str) -> Self {
        Self::new(
            subscription_id,
            resource_group,
            "Microsoft.HybridCompute",
            "machines",
            name,
        )
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/subscriptions/{}/resourceGroups/{}/providers/{}/{}/{}",
            self.subscription_id, self.resource_group, self.provider, self.resource_type, self.name
        )
    }
}

impl FromStr for ResourceId {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim_matches('/').split('/').collect();
        let invalid = || ProvisionError::Config(format!("Invalid resource id: '{}'", s));
        if parts.len() != 8
            || !parts[0].eq_ignore_ascii_case("subscriptions")
            || !parts[2].eq_ignore_ascii_case("resourceGroups")
            || !parts[4].eq_ignore_ascii_case("providers")
            || parts.iter().any(|p| p.is_empty())
        {
            return Err(invalid());
        }
        Ok(Self::new(parts[1], parts[3], parts[5], parts[6], parts[7]))
    }
}

impl TryFrom<String> for ResourceId {
    type Error = ProvisionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.to_string()
    }
}

/// Managed identity handle of a registered machine. Read-only once obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineIdentity {
    pub principal_id: Option<String>,
    pub resource_id: String,
    pub location: Option<String>,
    pub status: Option<String>,
    pub tags: BTreeMap<String, String>,
}

impl MachineIdentity {
    /// Principal id once the control plane has resolved it.
    pub fn resolved_principal(&self) -> Option<&str> {
        self.principal_id.as_deref().filter(|p| !p.is_empty())
    }
}

/// Target cluster properties that matter for node provisioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedCluster {
    pub id: String,
    pub name: String,
    pub location: String,
    pub kubernetes_version: String,
    pub current_kubernetes_version: Option<String>,
    pub fqdn: Option<String>,
    pub aad_managed: bool,
    pub azure_rbac_enabled: bool,
}

/// One entry of the authorization system's assignment listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleAssignment {
    pub id: String,
    pub scope: String,
    pub role_definition_id: String,
    pub principal_id: String,
}

impl RoleAssignment {
    /// True if this assignment grants `role_definition` (GUID or full id) to `principal_id` at `scope`.
    pub fn grants(&self, principal_id: &str, role_definition: &str, scope: &str) -> bool {
        let wanted = role_definition.rsplit('/').next().unwrap_or(role_definition);
        let actual = self
            .role_definition_id
            .rsplit('/')
            .next()
            .unwrap_or(&self.role_definition_id);
        self.principal_id.eq_ignore_ascii_case(principal_id)
            && actual.eq_ignore_ascii_case(wanted)
            && self
                .scope
                .trim_end_matches('/')
                .eq_ignore_ascii_case(scope.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLUSTER: &str = "/subscriptions/0000-1111/resourceGroups/rg-aks/providers/Microsoft.ContainerService/managedClusters/prod";

    #[test]
    fn parses_and_formats_resource_id() {
        let id: ResourceId = CLUSTER.parse().unwrap();
        assert_eq!(id.subscription_id, "0000-1111");
        assert_eq!(id.resource_group, "rg-aks");
        assert_eq!(id.provider, "Microsoft.ContainerService");
        assert_eq!(id.resource_type, "managedClusters");
        assert_eq!(id.name, "prod");
        assert_eq!(id.to_string(), CLUSTER);
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!("".parse::<ResourceId>().is_err());
        assert!("/subscriptions/x/resourceGroups/rg".parse::<ResourceId>().is_err());
        assert!("/subs/x/resourceGroups/rg/providers/a/b/c"
            .parse::<ResourceId>()
            .is_err());
    }

    #[test]
    fn grants_matches_guid_or_full_definition_id() {
        let assignment = RoleAssignment {
            id: "a".into(),
            scope: CLUSTER.into(),
            role_definition_id: "/subscriptions/0000-1111/providers/Microsoft.Authorization/roleDefinitions/ACDD72A7-3385-48EF-BD42-F606FBA81AE7".into(),
            principal_id: "p-1".into(),
        };
        assert!(assignment.grants("p-1", "acdd72a7-3385-48ef-bd42-f606fba81ae7", CLUSTER));
        assert!(!assignment.grants("p-2", "acdd72a7-3385-48ef-bd42-f606fba81ae7", CLUSTER));
        assert!(!assignment.grants("p-1", "b1ff04bb-8a4e-4dc4-8eb5-8693973ce19b", CLUSTER));
    }
}
