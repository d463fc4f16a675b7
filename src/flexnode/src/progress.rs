//! Progress types for provisioning runs.

use serde::{Deserialize, Serialize};

/// Progress of a bootstrap or unbootstrap run, one event per step boundary.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct BootstrapProgress {
    pub percentage: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
}

impl BootstrapProgress {
    pub fn new(percentage: u32, message: impl Into<String>) -> Self {
        Self {
            percentage,
            message: message.into(),
            phase: None,
            step_name: None,
        }
    }

    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    pub fn with_step(mut self, step_name: impl Into<String>) -> Self {
        self.step_name = Some(step_name.into());
        self
    }
}
