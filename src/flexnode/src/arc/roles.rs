//! Role assignment for the machine identity and the wait for it to take effect.
use crate::azure::{CloudErrorKind, ControlPlane};
use crate::provisioner::ProvisionError;
use crate::retry::{poll_until, retry_with_backoff, RetryPolicy};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const READER: &str = "acdd72a7-3385-48ef-bd42-f606fba81ae7";
const CLUSTER_USER: &str = "4abbcc35-e782-43d8-92c5-2d3f1bd2253f";
const CLUSTER_RBAC_ADMIN: &str = "b1ff04bb-8a4e-4dc4-8eb5-8693973ce19b";

/// One role the machine identity must hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleRequirement {
    pub name: &'static str,
    pub role_definition_id: &'static str,
    pub scope: String,
}

/// Fixed role set on the target cluster: read the resource, fetch user
/// credentials, and administer the data plane through Azure RBAC.
pub fn required_roles(cluster_id: &str) -> Vec<RoleRequirement> {
    [
        ("Reader", READER),
        ("Azure Kubernetes Service Cluster User Role", CLUSTER_USER),
        ("Azure Kubernetes Service RBAC Cluster Admin", CLUSTER_RBAC_ADMIN),
    ]
    .into_iter()
    .map(|(name, role_definition_id)| RoleRequirement {
        name,
        role_definition_id,
        scope: cluster_id.to_string(),
    })
    .collect()
}

/// Map one create failure onto the retry taxonomy.
///
/// `Ok(())` means the assignment exists. Replication lag becomes `NotReady`
/// so the retry helper backs off; caller privilege problems become `Permission`.
fn classify_create(result: Result<(), ProvisionError>) -> Result<(), ProvisionError> {
    let err = match result {
        Ok(()) => return Ok(()),
        Err(ProvisionError::Cloud(err)) => err,
        Err(other) => return Err(other),
    };
    match err.kind() {
        CloudErrorKind::AlreadyExists => Ok(()),
        CloudErrorKind::PrincipalNotFound => Err(ProvisionError::NotReady(format!(
            "principal not yet replicated: {}",
            err.message
        ))),
        CloudErrorKind::Forbidden | CloudErrorKind::Unauthorized => {
            Err(ProvisionError::Permission(err.to_string()))
        }
        _ => Err(ProvisionError::Cloud(err)),
    }
}

/// Create every required assignment. Failures are collected across all roles
/// rather than stopping at the first, then reported together.
pub async fn assign_roles(
    control_plane: &dyn ControlPlane,
    principal_id: &str,
    roles: &[RoleRequirement],
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<(), ProvisionError> {
    let mut failures: Vec<String> = Vec::new();

    for role in roles {
        let op_name = format!("assign {}", role.name);
        let outcome = retry_with_backoff(policy, &op_name, cancel, move |_attempt| async move {
            classify_create(
                control_plane
                    .create_role_assignment(&role.scope, role.role_definition_id, principal_id)
                    .await
                    .map(|_| ()),
            )
        })
        .await;

        match outcome {
            Ok(()) => tracing::info!("[RoleAssignment] {} granted to {}", role.name, principal_id),
            Err(ProvisionError::Cancelled) => return Err(ProvisionError::Cancelled),
            Err(e) => {
                tracing::error!("[RoleAssignment] {} failed: {}", role.name, e);
                failures.push(format!("{}: {}", role.name, e));
            }
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(ProvisionError::RoleAssignments {
            failed: failures.len(),
            total: roles.len(),
            details: failures.join("; "),
        })
    }
}

/// Poll the assignment listing until every required (principal, role, scope) is present.
pub async fn wait_for_permissions(
    control_plane: &dyn ControlPlane,
    principal_id: &str,
    roles: &[RoleRequirement],
    interval: Duration,
    deadline: Duration,
    cancel: &CancellationToken,
) -> Result<(), ProvisionError> {
    poll_until(
        "role assignments visible",
        interval,
        deadline,
        cancel,
        move || async move {
            let mut missing = Vec::new();
            for role in roles {
                let assignments = control_plane
                    .list_role_assignments(&role.scope, principal_id)
                    .await?;
                let present = assignments
                    .iter()
                    .any(|a| a.grants(principal_id, role.role_definition_id, &role.scope));
                if !present {
                    missing.push(role.name);
                }
            }
            if !missing.is_empty() {
                tracing::debug!("[RoleAssignment] Still waiting for: {}", missing.join(", "));
            }
            Ok::<_, ProvisionError>(missing.is_empty().then_some(()))
        },
    )
    .await
}

/// Delete every assignment the principal holds for the required roles. Missing ones are fine.
pub async fn remove_roles(
    control_plane: &dyn ControlPlane,
    principal_id: &str,
    roles: &[RoleRequirement],
) -> Result<(), ProvisionError> {
    let mut failures = Vec::new();
    for role in roles {
        let assignments = match control_plane
            .list_role_assignments(&role.scope, principal_id)
            .await
        {
            Ok(assignments) => assignments,
            Err(ProvisionError::Cloud(e)) if e.is_not_found() => continue,
            Err(e) => {
                failures.push(format!("{}: {}", role.name, e));
                continue;
            }
        };
        for assignment in assignments
            .iter()
            .filter(|a| a.grants(principal_id, role.role_definition_id, &role.scope))
        {
            match control_plane.delete_role_assignment(&assignment.id).await {
                Ok(()) => tracing::info!("[RoleAssignment] Removed {} ({})", role.name, assignment.id),
                Err(ProvisionError::Cloud(e)) if e.is_not_found() => {}
                Err(e) => failures.push(format!("{}: {}", role.name, e)),
            }
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(ProvisionError::RoleAssignments {
            failed: failures.len(),
            total: roles.len(),
            details: failures.join("; "),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::CloudError;

    #[test]
    fn required_roles_target_the_cluster() {
        let roles = required_roles("/subscriptions/s/resourceGroups/rg/providers/Microsoft.ContainerService/managedClusters/c");
        assert_eq!(roles.len(), 3);
        assert!(roles.iter().all(|r| r.scope.ends_with("/managedClusters/c")));
    }

    #[test]
    fn classification_of_create_errors() {
        let exists = Err(CloudError::new(409, "RoleAssignmentExists", "exists").into());
        assert!(classify_create(exists).is_ok());

        let lag = Err(CloudError::new(400, "PrincipalNotFound", "lag").into());
        assert!(matches!(classify_create(lag), Err(ProvisionError::NotReady(_))));

        let denied = Err(CloudError::new(403, "AuthorizationFailed", "denied").into());
        assert!(matches!(classify_create(denied), Err(ProvisionError::Permission(_))));

        let bad = Err(CloudError::new(400, "InvalidRoleDefinitionId", "bad").into());
        let err = classify_create(bad).unwrap_err();
        assert!(matches!(err, ProvisionError::Cloud(_)));
        assert!(!err.is_retryable());
    }
}
