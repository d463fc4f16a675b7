// Step abstraction and engine
pub mod step;
pub mod workflow;

// Installer and tear-down steps
pub mod tasks;

// Templates
pub mod embedded_templates;
pub mod template_renderer;

pub use step::{Step, StepEntry, ValidatingStep};
pub use template_renderer::TemplateRenderer;
pub use workflow::{run_steps, ExecutionMode, ExecutionResult, StepResult, StepRunError};
