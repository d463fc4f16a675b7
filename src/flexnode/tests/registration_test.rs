mod common;

use common::*;
use flexnode::arc::{ArcDeregistrationStep, ArcRegistrationStep};
use flexnode::{ProvisionError, Step, ValidatingStep};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn registration(
    plane: &Arc<FakeControlPlane>,
    agent: &Arc<FakeAgent>,
    credential_fails: bool,
) -> ArcRegistrationStep {
    ArcRegistrationStep::new(
        target(),
        Arc::new(StaticCredential {
            fail: credential_fails,
        }),
        plane.clone(),
        agent.clone(),
        fast_timings(),
    )
}

#[tokio::test(start_paused = true)]
async fn registers_assigns_and_becomes_complete() {
    let plane = FakeControlPlane::with_cluster(aad_cluster());
    let agent = FakeAgent::new(plane.clone());
    let step = registration(&plane, &agent, false);
    let cancel = CancellationToken::new();

    step.validate(&cancel).await.unwrap();
    assert!(!step.is_completed(&cancel).await);

    step.execute(&cancel).await.unwrap();

    assert_eq!(agent.connects.load(Ordering::SeqCst), 1);
    let request = agent.last_request.lock().unwrap().clone().unwrap();
    assert_eq!(request.machine_name, MACHINE);
    assert_eq!(request.access_token, "token");
    assert_eq!(plane.assignment_count(), 3);
    assert!(step.is_completed(&cancel).await);

    // a second run reuses the registration and the existing assignments
    step.execute(&cancel).await.unwrap();
    assert_eq!(agent.connects.load(Ordering::SeqCst), 1);
    assert_eq!(plane.assignment_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn waits_for_principal_to_resolve() {
    let plane = FakeControlPlane::with_cluster(aad_cluster());
    let agent = FakeAgent::new(plane.clone());
    *agent.connected.lock().unwrap() = true;
    plane.insert_machine(machine(None));

    let resolver = plane.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        resolver.insert_machine(machine(Some(PRINCIPAL)));
    });

    let step = registration(&plane, &agent, false);
    step.execute(&CancellationToken::new()).await.unwrap();

    // machine existed and the agent was connected, so no reconnect
    assert_eq!(agent.connects.load(Ordering::SeqCst), 0);
    assert_eq!(plane.assignment_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn authentication_failure_is_fatal() {
    let plane = FakeControlPlane::with_cluster(aad_cluster());
    let agent = FakeAgent::new(plane.clone());
    let step = registration(&plane, &agent, true);

    let err = step.execute(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, ProvisionError::Auth(_)));
    assert_eq!(agent.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn cluster_without_azure_rbac_is_rejected_before_roles() {
    let mut cluster = aad_cluster();
    cluster.azure_rbac_enabled = false;
    let plane = FakeControlPlane::with_cluster(cluster);
    let agent = FakeAgent::new(plane.clone());
    let step = registration(&plane, &agent, false);

    let err = step.execute(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, ProvisionError::Validation(_)));
    assert_eq!(plane.assignment_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn deregistration_removes_remote_then_local_state() {
    let plane = FakeControlPlane::with_cluster(aad_cluster());
    let agent = FakeAgent::new(plane.clone());
    let cancel = CancellationToken::new();
    registration(&plane, &agent, false)
        .execute(&cancel)
        .await
        .unwrap();

    let step = ArcDeregistrationStep::new(target(), plane.clone(), agent.clone());
    assert!(!step.is_completed(&cancel).await);
    step.execute(&cancel).await.unwrap();

    assert_eq!(plane.assignment_count(), 0);
    assert_eq!(plane.state.lock().unwrap().deleted_machines, vec![MACHINE.to_string()]);
    assert_eq!(agent.disconnects.load(Ordering::SeqCst), 1);
    assert!(step.is_completed(&cancel).await);

    // already gone: still succeeds
    step.execute(&cancel).await.unwrap();
    assert_eq!(agent.disconnects.load(Ordering::SeqCst), 1);
}
