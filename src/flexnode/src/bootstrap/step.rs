/// Step abstraction for provisioning and de-provisioning work.
///
/// Steps hold no state between runs. Durable state lives on the host
/// filesystem or in the control plane, which is what makes re-running a list
/// safe after a partial failure.
use crate::provisioner::ProvisionError;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    /// True when the desired end state already holds; the engine then skips `execute`.
    async fn is_completed(&self, cancel: &CancellationToken) -> bool;

    async fn execute(&self, cancel: &CancellationToken) -> Result<(), ProvisionError>;
}

/// Step with a precondition check, run before `execute` on the build-up path only.
#[async_trait]
pub trait ValidatingStep: Step {
    async fn validate(&self, cancel: &CancellationToken) -> Result<(), ProvisionError>;
}

/// A step as registered with the engine, tagged with its capability set at construction.
pub enum StepEntry {
    Plain(Box<dyn Step>),
    Validating(Box<dyn ValidatingStep>),
}

impl StepEntry {
    pub fn plain(step: impl Step + 'static) -> Self {
        StepEntry::Plain(Box::new(step))
    }

    pub fn validating(step: impl ValidatingStep + 'static) -> Self {
        StepEntry::Validating(Box::new(step))
    }

    pub fn name(&self) -> &str {
        match self {
            StepEntry::Plain(step) => step.name(),
            StepEntry::Validating(step) => step.name(),
        }
    }

    pub async fn is_completed(&self, cancel: &CancellationToken) -> bool {
        match self {
            StepEntry::Plain(step) => step.is_completed(cancel).await,
            StepEntry::Validating(step) => step.is_completed(cancel).await,
        }
    }

    pub async fn execute(&self, cancel: &CancellationToken) -> Result<(), ProvisionError> {
        match self {
            StepEntry::Plain(step) => step.execute(cancel).await,
            StepEntry::Validating(step) => step.execute(cancel).await,
        }
    }

    pub fn validator(&self) -> Option<&dyn ValidatingStep> {
        match self {
            StepEntry::Plain(_) => None,
            StepEntry::Validating(step) => Some(step.as_ref()),
        }
    }
}

impl std::fmt::Debug for StepEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            StepEntry::Plain(_) => "plain",
            StepEntry::Validating(_) => "validating",
        };
        write!(f, "StepEntry({} {})", kind, self.name())
    }
}
