/// External command execution with a bounded timeout and cancellation.
use crate::provisioner::ProvisionError;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Default bound for short host queries (version probes, systemctl).
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Last non-empty stderr line (falls back to stdout), for one-line error messages.
    pub fn last_line(&self) -> String {
        let last = |text: &'_ str| -> Option<String> {
            text.lines()
                .filter(|l| !l.trim().is_empty())
                .last()
                .map(str::to_string)
        };
        last(&self.stderr)
            .or_else(|| last(&self.stdout))
            .unwrap_or_else(|| "No output available".to_string())
    }
}

/// Run a command to completion, killing it if it outlives `timeout` or the token fires.
pub async fn run_command(
    program: &str,
    args: &[&str],
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<CommandOutput, ProvisionError> {
    tracing::debug!("[Process] Running {} {}", program, redact_args(args).join(" "));

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let output = tokio::select! {
        _ = cancel.cancelled() => return Err(ProvisionError::Cancelled),
        res = tokio::time::timeout(timeout, child.wait_with_output()) => match res {
            Ok(out) => out?,
            Err(_) => {
                return Err(ProvisionError::Timeout(format!(
                    "{} did not finish within {:?}",
                    program, timeout
                )))
            }
        },
    };

    Ok(CommandOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Run a command and turn a non-zero exit into an error built by `to_error`.
pub async fn run_checked(
    program: &str,
    args: &[&str],
    timeout: Duration,
    cancel: &CancellationToken,
    to_error: fn(String) -> ProvisionError,
) -> Result<CommandOutput, ProvisionError> {
    let output = run_command(program, args, timeout, cancel).await?;
    if !output.success() {
        return Err(to_error(format!(
            "{} {} exited with {}: {}",
            program,
            args.first().copied().unwrap_or_default(),
            output.exit_code,
            output.last_line()
        )));
    }
    Ok(output)
}

/// Hide values that follow secret-bearing flags in debug logs.
fn redact_args<'a>(args: &[&'a str]) -> Vec<&'a str> {
    let mut redacted = Vec::with_capacity(args.len());
    let mut hide_next = false;
    for arg in args {
        if hide_next {
            redacted.push("***");
            hide_next = false;
            continue;
        }
        hide_next = matches!(*arg, "--access-token" | "--service-principal-secret");
        redacted.push(*arg);
    }
    redacted
}
