mod common;

use common::{aad_cluster, principal_not_found, FakeControlPlane, CLUSTER_ID, PRINCIPAL};
use flexnode::arc::{assign_roles, remove_roles, required_roles, wait_for_permissions};
use flexnode::{CloudError, ProvisionError, RetryPolicy};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn policy(attempts: u32) -> RetryPolicy {
    RetryPolicy::new(Duration::from_secs(2), Duration::from_secs(30), attempts)
}

#[tokio::test(start_paused = true)]
async fn replication_lag_on_one_role_is_absorbed() {
    let plane = FakeControlPlane::with_cluster(aad_cluster());
    let roles = required_roles(CLUSTER_ID);
    assert_eq!(roles.len(), 3);
    plane.fail_creates(
        roles[1].role_definition_id,
        vec![principal_not_found(), principal_not_found()],
    );

    assign_roles(
        plane.as_ref(),
        PRINCIPAL,
        &roles,
        &policy(5),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(plane.create_calls(roles[0].role_definition_id), 1);
    assert_eq!(plane.create_calls(roles[1].role_definition_id), 3);
    assert_eq!(plane.create_calls(roles[2].role_definition_id), 1);
    assert_eq!(plane.assignment_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn existing_assignment_is_success() {
    let plane = FakeControlPlane::with_cluster(aad_cluster());
    let roles = required_roles(CLUSTER_ID);
    plane.fail_creates(
        roles[0].role_definition_id,
        vec![CloudError::new(
            409,
            "RoleAssignmentExists",
            "The role assignment already exists.",
        )],
    );

    assign_roles(
        plane.as_ref(),
        PRINCIPAL,
        &roles,
        &policy(5),
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(plane.create_calls(roles[0].role_definition_id), 1);
}

#[tokio::test(start_paused = true)]
async fn failures_are_collected_across_roles() {
    let plane = FakeControlPlane::with_cluster(aad_cluster());
    let roles = required_roles(CLUSTER_ID);
    plane.fail_creates(
        roles[0].role_definition_id,
        vec![CloudError::new(403, "AuthorizationFailed", "caller lacks write")],
    );
    plane.fail_creates(
        roles[2].role_definition_id,
        (0..5).map(|_| principal_not_found()).collect(),
    );

    let err = assign_roles(
        plane.as_ref(),
        PRINCIPAL,
        &roles,
        &policy(3),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    match err {
        ProvisionError::RoleAssignments {
            failed,
            total,
            details,
        } => {
            assert_eq!(failed, 2);
            assert_eq!(total, 3);
            assert!(details.contains(roles[0].name));
            assert!(details.contains(roles[2].name));
        }
        other => panic!("unexpected error: {other}"),
    }
    // permission denial is not retried; lag is retried up to the bound
    assert_eq!(plane.create_calls(roles[0].role_definition_id), 1);
    assert_eq!(plane.create_calls(roles[1].role_definition_id), 1);
    assert_eq!(plane.create_calls(roles[2].role_definition_id), 3);
}

#[tokio::test(start_paused = true)]
async fn waits_until_assignments_are_listed() {
    let plane = FakeControlPlane::with_cluster(aad_cluster());
    let roles = required_roles(CLUSTER_ID);
    let cancel = CancellationToken::new();
    assign_roles(plane.as_ref(), PRINCIPAL, &roles, &policy(1), &cancel)
        .await
        .unwrap();
    // two full polls of three roles see nothing
    plane.state.lock().unwrap().hidden_list_calls = 6;

    let started = tokio::time::Instant::now();
    wait_for_permissions(
        plane.as_ref(),
        PRINCIPAL,
        &roles,
        Duration::from_secs(10),
        Duration::from_secs(120),
        &cancel,
    )
    .await
    .unwrap();
    assert_eq!(started.elapsed(), Duration::from_secs(20));
}

#[tokio::test(start_paused = true)]
async fn permission_wait_times_out() {
    let plane = FakeControlPlane::with_cluster(aad_cluster());
    let roles = required_roles(CLUSTER_ID);

    let err = wait_for_permissions(
        plane.as_ref(),
        PRINCIPAL,
        &roles,
        Duration::from_secs(10),
        Duration::from_secs(60),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ProvisionError::Timeout(_)));
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_backoff() {
    let plane = FakeControlPlane::with_cluster(aad_cluster());
    let roles = required_roles(CLUSTER_ID);
    plane.fail_creates(
        roles[0].role_definition_id,
        (0..10).map(|_| principal_not_found()).collect(),
    );
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        trigger.cancel();
    });

    let err = assign_roles(plane.as_ref(), PRINCIPAL, &roles, &policy(10), &cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(plane.create_calls(roles[1].role_definition_id), 0);
}

#[tokio::test]
async fn removal_tolerates_missing_assignments() {
    let plane = FakeControlPlane::with_cluster(aad_cluster());
    let roles = required_roles(CLUSTER_ID);
    let cancel = CancellationToken::new();

    remove_roles(plane.as_ref(), PRINCIPAL, &roles).await.unwrap();

    assign_roles(plane.as_ref(), PRINCIPAL, &roles, &policy(1), &cancel)
        .await
        .unwrap();
    remove_roles(plane.as_ref(), PRINCIPAL, &roles).await.unwrap();
    assert_eq!(plane.assignment_count(), 0);
    assert_eq!(plane.state.lock().unwrap().deleted_assignments.len(), 3);
}
