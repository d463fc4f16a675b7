#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use flexnode::arc::{AgentShow, ArcAgent, ConnectRequest, RegistrationTarget, RegistrationTimings};
use flexnode::azure::{MachineIdentity, ManagedCluster, RoleAssignment};
use flexnode::{
    AccessToken, CloudError, ControlPlane, CredentialProvider, ProvisionError, RetryPolicy, Step,
    ValidatingStep,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const SUBSCRIPTION: &str = "00000000-0000-0000-0000-000000000001";
pub const CLUSTER_ID: &str = "/subscriptions/00000000-0000-0000-0000-000000000001/resourceGroups/aks-rg/providers/Microsoft.ContainerService/managedClusters/prod";
pub const MACHINE: &str = "edge-01";
pub const PRINCIPAL: &str = "11111111-2222-3333-4444-555555555555";

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// Shared call log so tests can assert cross-step ordering.
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub struct RecordingStep {
    pub name: String,
    pub completed: bool,
    pub fail_execute: bool,
    pub fail_validate: bool,
    pub executions: Arc<AtomicU32>,
    pub log: CallLog,
}

impl RecordingStep {
    pub fn new(name: &str, log: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            completed: false,
            fail_execute: false,
            fail_validate: false,
            executions: Arc::new(AtomicU32::new(0)),
            log: log.clone(),
        }
    }

    pub fn completed(mut self) -> Self {
        self.completed = true;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_execute = true;
        self
    }

    pub fn invalid(mut self) -> Self {
        self.fail_validate = true;
        self
    }

    pub fn counter(&self) -> Arc<AtomicU32> {
        self.executions.clone()
    }
}

#[async_trait]
impl Step for RecordingStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_completed(&self, _cancel: &CancellationToken) -> bool {
        self.completed
    }

    async fn execute(&self, _cancel: &CancellationToken) -> Result<(), ProvisionError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(format!("execute:{}", self.name));
        if self.fail_execute {
            Err(ProvisionError::Install(format!("{} exploded", self.name)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ValidatingStep for RecordingStep {
    async fn validate(&self, _cancel: &CancellationToken) -> Result<(), ProvisionError> {
        self.log.lock().unwrap().push(format!("validate:{}", self.name));
        if self.fail_validate {
            Err(ProvisionError::Validation(format!("{} precondition", self.name)))
        } else {
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Control plane
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct PlaneState {
    pub machines: HashMap<String, MachineIdentity>,
    pub cluster: Option<ManagedCluster>,
    pub assignments: Vec<RoleAssignment>,
    /// Errors returned by successive create calls, keyed by role definition GUID.
    pub create_failures: HashMap<String, VecDeque<CloudError>>,
    pub create_calls: HashMap<String, u32>,
    /// Listing returns nothing until this many list calls have been made.
    pub hidden_list_calls: u32,
    pub list_calls: u32,
    pub kubeconfig: Vec<u8>,
    pub deleted_machines: Vec<String>,
    pub deleted_assignments: Vec<String>,
}

#[derive(Default)]
pub struct FakeControlPlane {
    pub state: Mutex<PlaneState>,
}

pub fn machine(principal: Option<&str>) -> MachineIdentity {
    MachineIdentity {
        principal_id: principal.map(str::to_string),
        resource_id: format!(
            "/subscriptions/{}/resourceGroups/edge-rg/providers/Microsoft.HybridCompute/machines/{}",
            SUBSCRIPTION, MACHINE
        ),
        location: Some("westus2".to_string()),
        status: Some("Connected".to_string()),
        tags: BTreeMap::new(),
    }
}

pub fn aad_cluster() -> ManagedCluster {
    ManagedCluster {
        id: CLUSTER_ID.to_string(),
        name: "prod".to_string(),
        location: "westus2".to_string(),
        kubernetes_version: "1.30".to_string(),
        current_kubernetes_version: Some("1.30.6".to_string()),
        fqdn: Some("prod-dns.hcp.westus2.azmk8s.io".to_string()),
        aad_managed: true,
        azure_rbac_enabled: true,
    }
}

pub fn guid(role_definition_id: &str) -> String {
    role_definition_id
        .rsplit('/')
        .next()
        .unwrap_or(role_definition_id)
        .to_ascii_lowercase()
}

impl FakeControlPlane {
    pub fn with_cluster(cluster: ManagedCluster) -> Arc<Self> {
        let plane = Self::default();
        plane.state.lock().unwrap().cluster = Some(cluster);
        Arc::new(plane)
    }

    pub fn fail_creates(&self, role_definition_id: &str, errors: Vec<CloudError>) {
        self.state
            .lock()
            .unwrap()
            .create_failures
            .insert(guid(role_definition_id), errors.into());
    }

    pub fn create_calls(&self, role_definition_id: &str) -> u32 {
        self.state
            .lock()
            .unwrap()
            .create_calls
            .get(&guid(role_definition_id))
            .copied()
            .unwrap_or(0)
    }

    pub fn insert_machine(&self, identity: MachineIdentity) {
        self.state
            .lock()
            .unwrap()
            .machines
            .insert(MACHINE.to_string(), identity);
    }

    pub fn assignment_count(&self) -> usize {
        self.state.lock().unwrap().assignments.len()
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn get_machine(&self, name: &str) -> Result<Option<MachineIdentity>, ProvisionError> {
        Ok(self.state.lock().unwrap().machines.get(name).cloned())
    }

    async fn delete_machine(&self, name: &str) -> Result<(), ProvisionError> {
        let mut state = self.state.lock().unwrap();
        state.machines.remove(name);
        state.deleted_machines.push(name.to_string());
        Ok(())
    }

    async fn get_managed_cluster(
        &self,
        _cluster_id: &str,
    ) -> Result<Option<ManagedCluster>, ProvisionError> {
        Ok(self.state.lock().unwrap().cluster.clone())
    }

    async fn create_role_assignment(
        &self,
        scope: &str,
        role_definition_id: &str,
        principal_id: &str,
    ) -> Result<RoleAssignment, ProvisionError> {
        let mut state = self.state.lock().unwrap();
        let key = guid(role_definition_id);
        *state.create_calls.entry(key.clone()).or_default() += 1;
        if let Some(err) = state
            .create_failures
            .get_mut(&key)
            .and_then(VecDeque::pop_front)
        {
            return Err(err.into());
        }
        if state
            .assignments
            .iter()
            .any(|a| a.grants(principal_id, &key, scope))
        {
            return Err(CloudError::new(
                409,
                "RoleAssignmentExists",
                "The role assignment already exists.",
            )
            .into());
        }
        let assignment = RoleAssignment {
            id: format!("{}/providers/Microsoft.Authorization/roleAssignments/{}", scope, key),
            scope: scope.to_string(),
            role_definition_id: format!(
                "/subscriptions/{}/providers/Microsoft.Authorization/roleDefinitions/{}",
                SUBSCRIPTION, key
            ),
            principal_id: principal_id.to_string(),
        };
        state.assignments.push(assignment.clone());
        Ok(assignment)
    }

    async fn list_role_assignments(
        &self,
        scope: &str,
        principal_id: &str,
    ) -> Result<Vec<RoleAssignment>, ProvisionError> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;
        if state.list_calls <= state.hidden_list_calls {
            return Ok(Vec::new());
        }
        Ok(state
            .assignments
            .iter()
            .filter(|a| a.scope == scope && a.principal_id == principal_id)
            .cloned()
            .collect())
    }

    async fn delete_role_assignment(&self, assignment_id: &str) -> Result<(), ProvisionError> {
        let mut state = self.state.lock().unwrap();
        state.assignments.retain(|a| a.id != assignment_id);
        state.deleted_assignments.push(assignment_id.to_string());
        Ok(())
    }

    async fn list_cluster_user_credentials(
        &self,
        _cluster_id: &str,
    ) -> Result<Vec<u8>, ProvisionError> {
        Ok(self.state.lock().unwrap().kubeconfig.clone())
    }
}

// ---------------------------------------------------------------------------
// Registration agent and credential
// ---------------------------------------------------------------------------

/// Agent whose `connect` makes the machine appear on the fake control plane.
pub struct FakeAgent {
    pub plane: Arc<FakeControlPlane>,
    pub connected: Mutex<bool>,
    pub connects: AtomicU32,
    pub disconnects: AtomicU32,
    pub last_request: Mutex<Option<ConnectRequest>>,
}

impl FakeAgent {
    pub fn new(plane: Arc<FakeControlPlane>) -> Arc<Self> {
        Arc::new(Self {
            plane,
            connected: Mutex::new(false),
            connects: AtomicU32::new(0),
            disconnects: AtomicU32::new(0),
            last_request: Mutex::new(None),
        })
    }
}

#[async_trait]
impl ArcAgent for FakeAgent {
    async fn connect(
        &self,
        request: &ConnectRequest,
        _cancel: &CancellationToken,
    ) -> Result<(), ProvisionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        *self.connected.lock().unwrap() = true;
        *self.last_request.lock().unwrap() = Some(request.clone());
        self.plane.insert_machine(machine(Some(PRINCIPAL)));
        Ok(())
    }

    async fn show(&self, _cancel: &CancellationToken) -> Result<AgentShow, ProvisionError> {
        let connected = *self.connected.lock().unwrap();
        Ok(AgentShow {
            status: if connected { "Connected" } else { "Disconnected" }.to_string(),
            resource_name: if connected { MACHINE.to_string() } else { String::new() },
            ..AgentShow::default()
        })
    }

    async fn disconnect(&self, _cancel: &CancellationToken) -> Result<(), ProvisionError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        *self.connected.lock().unwrap() = false;
        Ok(())
    }
}

pub struct StaticCredential {
    pub fail: bool,
}

#[async_trait]
impl CredentialProvider for StaticCredential {
    async fn token(&self, _scope: &str) -> Result<AccessToken, ProvisionError> {
        if self.fail {
            return Err(ProvisionError::Auth("no cached login".to_string()));
        }
        Ok(AccessToken {
            token: "token".to_string(),
            expires_on: Utc::now() + ChronoDuration::hours(1),
        })
    }
}

pub fn target() -> RegistrationTarget {
    RegistrationTarget {
        machine_name: MACHINE.to_string(),
        subscription_id: SUBSCRIPTION.to_string(),
        tenant_id: "tenant".to_string(),
        resource_group: "edge-rg".to_string(),
        location: "westus2".to_string(),
        cloud: "AzureCloud".to_string(),
        tags: BTreeMap::new(),
        cluster_id: CLUSTER_ID.to_string(),
        token_scope: "https://management.azure.com/.default".to_string(),
    }
}

pub fn fast_timings() -> RegistrationTimings {
    RegistrationTimings {
        registration: RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(4), 5),
        role_assignment: RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(8), 5),
        permission_interval: Duration::from_secs(10),
        permission_deadline: Duration::from_secs(120),
    }
}

pub fn principal_not_found() -> CloudError {
    CloudError::new(
        400,
        "PrincipalNotFound",
        "Principal 11111111 does not exist in the directory.",
    )
}
