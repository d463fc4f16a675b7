/// systemctl wrappers shared by install, tear-down and status sampling
use crate::process::{run_checked, run_command, CommandOutput, QUERY_TIMEOUT};
use crate::provisioner::ProvisionError;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const SYSTEMCTL: &str = "systemctl";
/// Starting a unit may wait on image pulls or cgroup setup.
const START_TIMEOUT: Duration = Duration::from_secs(120);

pub async fn daemon_reload(cancel: &CancellationToken) -> Result<(), ProvisionError> {
    run_checked(SYSTEMCTL, &["daemon-reload"], START_TIMEOUT, cancel, ProvisionError::Service)
        .await?;
    Ok(())
}

pub async fn enable_now(unit: &str, cancel: &CancellationToken) -> Result<(), ProvisionError> {
    tracing::info!("[Systemd] Enabling and starting {}", unit);
    run_checked(
        SYSTEMCTL,
        &["enable", "--now", unit],
        START_TIMEOUT,
        cancel,
        ProvisionError::Service,
    )
    .await?;
    Ok(())
}

pub async fn restart(unit: &str, cancel: &CancellationToken) -> Result<(), ProvisionError> {
    tracing::info!("[Systemd] Restarting {}", unit);
    run_checked(SYSTEMCTL, &["restart", unit], START_TIMEOUT, cancel, ProvisionError::Service)
        .await?;
    Ok(())
}

/// Stop and disable a unit; a unit that is not installed counts as stopped.
pub async fn disable_now(unit: &str, cancel: &CancellationToken) -> Result<(), ProvisionError> {
    let output = run_command(SYSTEMCTL, &["disable", "--now", unit], START_TIMEOUT, cancel).await?;
    if output.success() || unit_missing(&output) {
        return Ok(());
    }
    Err(ProvisionError::Service(format!(
        "systemctl disable --now {} exited with {}: {}",
        unit,
        output.exit_code,
        output.last_line()
    )))
}

fn unit_missing(output: &CommandOutput) -> bool {
    let text = output.stderr.to_ascii_lowercase();
    text.contains("not loaded") || text.contains("does not exist") || text.contains("not found")
}

/// `systemctl is-active`; any failure to ask reads as inactive.
pub async fn is_active(unit: &str, cancel: &CancellationToken) -> bool {
    match run_command(SYSTEMCTL, &["is-active", unit], QUERY_TIMEOUT, cancel).await {
        Ok(output) => output.success() && output.stdout.trim() == "active",
        Err(e) => {
            tracing::debug!("[Systemd] is-active {} failed: {}", unit, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_missing_unit_messages() {
        let output = CommandOutput {
            exit_code: 1,
            stdout: String::new(),
            stderr: "Failed to disable unit: Unit file kubelet.service does not exist.\n".into(),
        };
        assert!(unit_missing(&output));

        let output = CommandOutput {
            exit_code: 1,
            stdout: String::new(),
            stderr: "Failed to connect to bus: Permission denied\n".into(),
        };
        assert!(!unit_missing(&output));
    }
}
