//! Progress reporting and error types for provisioning operations.

use crate::azure::CloudError;
use crate::progress::BootstrapProgress;

/// Progress reporter for provisioning runs.
pub trait ProgressReporter: Send + Sync {
    fn emit(&self, progress: BootstrapProgress);
}

/// Reporter that writes progress to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgressReporter;

impl ProgressReporter for TracingProgressReporter {
    fn emit(&self, progress: BootstrapProgress) {
        match (&progress.phase, &progress.step_name) {
            (Some(phase), Some(step)) => tracing::info!(
                "[{}%] {} ({}/{})",
                progress.percentage,
                progress.message,
                phase,
                step
            ),
            _ => tracing::info!("[{}%] {}", progress.percentage, progress.message),
        }
    }
}

/// Error type for provisioning operations.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Cloud error: {0}")]
    Cloud(#[from] CloudError),

    /// Written but not yet observable; the only class retried internally.
    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Registration agent error: {0}")]
    Agent(String),

    #[error("Role assignment failed for {failed} of {total} roles: {details}")]
    RoleAssignments {
        failed: usize,
        total: usize,
        details: String,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Install error: {0}")]
    Install(String),

    #[error("Service error: {0}")]
    Service(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Status error: {0}")]
    Status(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("{op} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        op: String,
        attempts: u32,
        #[source]
        source: Box<ProvisionError>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ProvisionError {
    /// Transient failures that a bounded retry may outlast.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProvisionError::NotReady(_) => true,
            ProvisionError::Cloud(e) => e.is_retryable(),
            ProvisionError::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| s.is_server_error())
            }
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProvisionError::Cancelled)
    }
}
