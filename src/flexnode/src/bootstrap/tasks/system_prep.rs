/// Host preparation: requirement checks, swap, kernel modules and sysctl settings
use crate::bootstrap::{Step, ValidatingStep};
use crate::process::{run_checked, QUERY_TIMEOUT};
use crate::provisioner::ProvisionError;
use crate::status::store::write_bytes_atomic;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

const KERNEL_MODULES: &[&str] = &["overlay", "br_netfilter"];

const SYSCTL_SETTINGS: &[(&str, &str)] = &[
    ("net.bridge.bridge-nf-call-iptables", "1"),
    ("net.bridge.bridge-nf-call-ip6tables", "1"),
    ("net.ipv4.ip_forward", "1"),
];

/// Individual check item
#[derive(Debug, Clone)]
pub struct CheckItem {
    pub name: String,
    pub passed: bool,
    pub message: String,
    pub fix_command: Option<String>,
}

impl CheckItem {
    fn pass(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            message: message.to_string(),
            fix_command: None,
        }
    }

    fn fail(name: &str, message: &str, fix: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            message: message.to_string(),
            fix_command: fix.map(str::to_string),
        }
    }
}

/// Result of host requirements check
#[derive(Debug, Clone)]
pub struct SystemCheckResult {
    pub passed: bool,
    pub checks: Vec<CheckItem>,
}

impl SystemCheckResult {
    /// Formatted list of failed checks, if any.
    pub fn error_message(&self) -> Option<String> {
        if self.passed {
            return None;
        }
        let mut msg = String::from("host requirements not met:");
        for check in self.checks.iter().filter(|c| !c.passed) {
            msg.push_str(&format!(" [{}] {}", check.name, check.message));
            if let Some(fix) = &check.fix_command {
                msg.push_str(&format!(" (fix: {})", fix));
            }
            msg.push(';');
        }
        Some(msg)
    }
}

pub fn check_system_requirements() -> SystemCheckResult {
    let checks = vec![check_os(), check_root(), check_systemd()];
    let passed = checks.iter().all(|c| c.passed);
    SystemCheckResult { passed, checks }
}

fn check_os() -> CheckItem {
    if cfg!(target_os = "linux") {
        CheckItem::pass("Operating system", "Linux")
    } else {
        CheckItem::fail("Operating system", std::env::consts::OS, None)
    }
}

#[cfg(target_os = "linux")]
fn check_root() -> CheckItem {
    if nix::unistd::geteuid().is_root() {
        CheckItem::pass("Privileges", "running as root")
    } else {
        CheckItem::fail("Privileges", "root is required", Some("sudo flex-node ..."))
    }
}

#[cfg(not(target_os = "linux"))]
fn check_root() -> CheckItem {
    CheckItem::fail("Privileges", "unsupported platform", None)
}

fn check_systemd() -> CheckItem {
    if Path::new("/run/systemd/system").is_dir() {
        CheckItem::pass("Init system", "systemd")
    } else {
        CheckItem::fail("Init system", "systemd is not running", None)
    }
}

fn modules_content() -> String {
    KERNEL_MODULES.iter().map(|m| format!("{}\n", m)).collect()
}

fn sysctl_content() -> String {
    SYSCTL_SETTINGS
        .iter()
        .map(|(k, v)| format!("{} = {}\n", k, v))
        .collect()
}

/// No active swap devices per `/proc/swaps` (header line only).
fn swap_disabled(proc_swaps: &str) -> bool {
    proc_swaps.lines().skip(1).all(|l| l.trim().is_empty())
}

fn file_has(path: &Path, expected: &str) -> bool {
    std::fs::read_to_string(path).is_ok_and(|actual| actual == expected)
}

pub struct SystemPrepStep {
    modules_file: PathBuf,
    sysctl_file: PathBuf,
}

impl SystemPrepStep {
    pub fn new(modules_file: PathBuf, sysctl_file: PathBuf) -> Self {
        Self {
            modules_file,
            sysctl_file,
        }
    }
}

#[async_trait]
impl Step for SystemPrepStep {
    fn name(&self) -> &str {
        "system-prep"
    }

    async fn is_completed(&self, _cancel: &CancellationToken) -> bool {
        let swaps = std::fs::read_to_string("/proc/swaps").unwrap_or_default();
        swap_disabled(&swaps)
            && file_has(&self.modules_file, &modules_content())
            && file_has(&self.sysctl_file, &sysctl_content())
    }

    async fn execute(&self, cancel: &CancellationToken) -> Result<(), ProvisionError> {
        tracing::info!("[SystemPrep] Disabling swap");
        run_checked("swapoff", &["-a"], QUERY_TIMEOUT, cancel, ProvisionError::Install).await?;

        write_bytes_atomic(&self.modules_file, modules_content().as_bytes(), Some(0o644))?;
        for module in KERNEL_MODULES {
            run_checked("modprobe", &[*module], QUERY_TIMEOUT, cancel, ProvisionError::Install)
                .await?;
        }

        write_bytes_atomic(&self.sysctl_file, sysctl_content().as_bytes(), Some(0o644))?;
        run_checked("sysctl", &["--system"], QUERY_TIMEOUT, cancel, ProvisionError::Install)
            .await?;

        tracing::info!(
            "[SystemPrep] Wrote {} and {}",
            self.modules_file.display(),
            self.sysctl_file.display()
        );
        Ok(())
    }
}

#[async_trait]
impl ValidatingStep for SystemPrepStep {
    async fn validate(&self, _cancel: &CancellationToken) -> Result<(), ProvisionError> {
        let result = check_system_requirements();
        for check in &result.checks {
            tracing::debug!(
                "[SystemPrep] {}: {} ({})",
                check.name,
                if check.passed { "ok" } else { "FAILED" },
                check.message
            );
        }
        match result.error_message() {
            Some(msg) => Err(ProvisionError::Validation(msg)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_proc_swaps() {
        let header = "Filename\t\t\t\tType\t\tSize\t\tUsed\t\tPriority\n";
        assert!(swap_disabled(header));
        let active = format!("{}/swap.img file 2097148 0 -2\n", header);
        assert!(!swap_disabled(&active));
    }

    #[test]
    fn error_message_lists_only_failures() {
        let result = SystemCheckResult {
            passed: false,
            checks: vec![
                CheckItem::pass("Operating system", "Linux"),
                CheckItem::fail("Privileges", "root is required", Some("sudo flex-node ...")),
            ],
        };
        let msg = result.error_message().unwrap();
        assert!(msg.contains("Privileges"));
        assert!(msg.contains("sudo flex-node"));
        assert!(!msg.contains("Operating system"));
    }

    #[test]
    fn settings_files_are_line_oriented() {
        assert_eq!(modules_content(), "overlay\nbr_netfilter\n");
        assert!(sysctl_content().contains("net.ipv4.ip_forward = 1\n"));
    }
}
