//! Local registration agent (`azcmagent`) driven as an external process.
use crate::process::{run_command, CommandOutput};
use crate::provisioner::ProvisionError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Status queries get a short bound independent of any polling deadline.
pub const SHOW_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(600);
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(120);

/// Parsed `azcmagent show` output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentShow {
    pub status: String,
    pub resource_name: String,
    pub resource_id: String,
    pub resource_group: String,
    pub location: String,
    pub last_heartbeat: Option<String>,
    pub agent_version: String,
}

impl AgentShow {
    pub fn is_connected(&self) -> bool {
        self.status.trim().eq_ignore_ascii_case("connected")
    }
}

/// Extract the `Key : Value` lines of `azcmagent show`. Unknown keys are ignored.
pub fn parse_agent_show(text: &str) -> AgentShow {
    let mut show = AgentShow::default();
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        match key.trim().to_ascii_lowercase().as_str() {
            "agent status" => show.status = value,
            "resource name" => show.resource_name = value,
            "resource id" => show.resource_id = value,
            "resource group name" => show.resource_group = value,
            "location" => show.location = value,
            "agent last heartbeat" => {
                show.last_heartbeat = (!value.is_empty()).then_some(value)
            }
            "agent version" => show.agent_version = value,
            _ => {}
        }
    }
    show
}

/// Parameters of one `connect` call.
#[derive(Clone)]
pub struct ConnectRequest {
    pub machine_name: String,
    pub subscription_id: String,
    pub tenant_id: String,
    pub resource_group: String,
    pub location: String,
    pub cloud: String,
    pub tags: BTreeMap<String, String>,
    pub access_token: String,
}

impl std::fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("machine_name", &self.machine_name)
            .field("resource_group", &self.resource_group)
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait ArcAgent: Send + Sync {
    /// Register this machine with the control plane.
    async fn connect(
        &self,
        request: &ConnectRequest,
        cancel: &CancellationToken,
    ) -> Result<(), ProvisionError>;

    async fn show(&self, cancel: &CancellationToken) -> Result<AgentShow, ProvisionError>;

    /// Remove local agent state only; the remote resource is left alone.
    async fn disconnect(&self, cancel: &CancellationToken) -> Result<(), ProvisionError>;
}

/// [`ArcAgent`] over the `azcmagent` binary.
#[derive(Debug, Clone)]
pub struct AzcmAgent {
    binary: String,
}

impl Default for AzcmAgent {
    fn default() -> Self {
        Self {
            binary: "azcmagent".to_string(),
        }
    }
}

impl AzcmAgent {
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn check(&self, verb: &str, output: CommandOutput) -> Result<CommandOutput, ProvisionError> {
        if output.success() {
            Ok(output)
        } else {
            Err(ProvisionError::Agent(format!(
                "{} {} exited with {}: {}",
                self.binary,
                verb,
                output.exit_code,
                output.last_line()
            )))
        }
    }
}

fn join_tags(tags: &BTreeMap<String, String>) -> String {
    tags.iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl ArcAgent for AzcmAgent {
    async fn connect(
        &self,
        request: &ConnectRequest,
        cancel: &CancellationToken,
    ) -> Result<(), ProvisionError> {
        tracing::info!(
            "[ArcAgent] Connecting machine {} to {}/{}",
            request.machine_name,
            request.resource_group,
            request.location
        );
        let tags = join_tags(&request.tags);
        let mut args = vec![
            "connect",
            "--resource-name",
            request.machine_name.as_str(),
            "--subscription-id",
            request.subscription_id.as_str(),
            "--tenant-id",
            request.tenant_id.as_str(),
            "--resource-group",
            request.resource_group.as_str(),
            "--location",
            request.location.as_str(),
            "--cloud",
            request.cloud.as_str(),
            "--access-token",
            request.access_token.as_str(),
        ];
        if !tags.is_empty() {
            args.extend(["--tags", tags.as_str()]);
        }

        let output = run_command(&self.binary, &args, CONNECT_TIMEOUT, cancel).await?;
        self.check("connect", output)?;
        Ok(())
    }

    async fn show(&self, cancel: &CancellationToken) -> Result<AgentShow, ProvisionError> {
        let output = run_command(&self.binary, &["show"], SHOW_TIMEOUT, cancel).await?;
        let output = self.check("show", output)?;
        Ok(parse_agent_show(&output.stdout))
    }

    async fn disconnect(&self, cancel: &CancellationToken) -> Result<(), ProvisionError> {
        let output = run_command(
            &self.binary,
            &["disconnect", "--force-local-only"],
            DISCONNECT_TIMEOUT,
            cancel,
        )
        .await?;
        self.check("disconnect", output)?;
        Ok(())
    }
}
