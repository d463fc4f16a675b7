/// Step execution engine.
///
/// Runs an ordered step list with progress reporting. Build-up is fail-fast:
/// the first failing step ends the run. Tear-down is best-effort: failures are
/// recorded and the remaining steps still run.
use super::step::StepEntry;
use crate::progress::BootstrapProgress;
use crate::provisioner::{ProgressReporter, ProvisionError};
use std::fmt;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    BuildUp,
    TearDown,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::BuildUp => write!(f, "build-up"),
            ExecutionMode::TearDown => write!(f, "tear-down"),
        }
    }
}

/// Outcome of one attempted step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub name: String,
    pub success: bool,
    pub duration: Duration,
    pub error: Option<String>,
}

impl StepResult {
    fn ok(name: &str, duration: Duration) -> Self {
        Self {
            name: name.to_string(),
            success: true,
            duration,
            error: None,
        }
    }

    fn failed(name: &str, duration: Duration, error: &ProvisionError) -> Self {
        Self {
            name: name.to_string(),
            success: false,
            duration,
            error: Some(error.to_string()),
        }
    }
}

/// Aggregate outcome of one engine run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub success: bool,
    pub step_count: usize,
    pub duration: Duration,
    pub step_results: Vec<StepResult>,
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn failed_steps(&self) -> impl Iterator<Item = &StepResult> {
        self.step_results.iter().filter(|r| !r.success)
    }
}

/// Build-up failure: the step that ended the run, its error and everything recorded so far.
#[derive(Debug, thiserror::Error)]
#[error("step '{step}' failed: {source}")]
pub struct StepRunError {
    pub step: String,
    pub source: ProvisionError,
    pub result: ExecutionResult,
}

fn progress_at(index: usize, total: usize) -> u32 {
    if total == 0 {
        return 100;
    }
    (index * 100 / total) as u32
}

fn finish(
    step_count: usize,
    started: Instant,
    step_results: Vec<StepResult>,
) -> ExecutionResult {
    let failed: Vec<&str> = step_results
        .iter()
        .filter(|r| !r.success)
        .map(|r| r.name.as_str())
        .collect();
    let error = (!failed.is_empty()).then(|| {
        format!(
            "{} of {} steps failed: {}",
            failed.len(),
            step_count,
            failed.join(", ")
        )
    });
    ExecutionResult {
        success: failed.is_empty(),
        step_count,
        duration: started.elapsed(),
        step_results,
        error,
    }
}

/// Execute `steps` in order under the failure policy of `mode`.
///
/// Build-up returns `Err` for the first failing step (including a failed
/// validation or a cancellation). Tear-down always returns `Ok`; inspect
/// `success` and `step_results` for partial failures. Steps a cancelled
/// tear-down never reached are recorded as cancelled failures.
pub async fn run_steps(
    steps: &[StepEntry],
    mode: ExecutionMode,
    cancel: &CancellationToken,
    reporter: &dyn ProgressReporter,
) -> Result<ExecutionResult, StepRunError> {
    let started = Instant::now();
    let total = steps.len();
    let mut step_results: Vec<StepResult> = Vec::with_capacity(total);

    tracing::info!("[StepEngine] Starting {} run with {} steps", mode, total);

    for (index, step) in steps.iter().enumerate() {
        let name = step.name();
        reporter.emit(
            BootstrapProgress::new(progress_at(index, total), format!("Running {}", name))
                .with_phase(mode.to_string())
                .with_step(name),
        );

        if cancel.is_cancelled() {
            match mode {
                ExecutionMode::BuildUp => {
                    let err = ProvisionError::Cancelled;
                    step_results.push(StepResult::failed(name, Duration::ZERO, &err));
                    return Err(StepRunError {
                        step: name.to_string(),
                        source: err,
                        result: finish(total, started, step_results),
                    });
                }
                ExecutionMode::TearDown => {
                    let skipped = total - index;
                    tracing::warn!(
                        "[StepEngine] Cancelled before {}; {} steps not attempted",
                        name,
                        skipped
                    );
                    for entry in &steps[index..] {
                        step_results.push(StepResult::failed(
                            entry.name(),
                            Duration::ZERO,
                            &ProvisionError::Cancelled,
                        ));
                    }
                    let mut result = finish(total, started, step_results);
                    result.error = Some(format!(
                        "cancelled with {} of {} steps not attempted ({})",
                        skipped,
                        total,
                        result.error.unwrap_or_default()
                    ));
                    return Ok(result);
                }
            }
        }

        if step.is_completed(cancel).await {
            tracing::info!("[StepEngine] {} already completed, skipping", name);
            step_results.push(StepResult::ok(name, Duration::ZERO));
            continue;
        }

        let step_start = Instant::now();
        let outcome = match (mode, step.validator()) {
            (ExecutionMode::BuildUp, Some(validator)) => match validator.validate(cancel).await {
                Ok(()) => step.execute(cancel).await,
                Err(e) => {
                    tracing::error!("[StepEngine] {} validation failed: {}", name, e);
                    Err(e)
                }
            },
            _ => step.execute(cancel).await,
        };
        let step_duration = step_start.elapsed();

        match outcome {
            Ok(()) => {
                tracing::info!(
                    step = name,
                    "[TIMING] Step {} completed in {}ms",
                    name,
                    step_duration.as_millis()
                );
                step_results.push(StepResult::ok(name, step_duration));
            }
            Err(e) => {
                tracing::warn!(
                    step = name,
                    "[TIMING] Step {} failed after {}ms",
                    name,
                    step_duration.as_millis()
                );
                step_results.push(StepResult::failed(name, step_duration, &e));
                match mode {
                    ExecutionMode::BuildUp => {
                        tracing::error!("[StepEngine] {} failed, aborting build-up: {}", name, e);
                        return Err(StepRunError {
                            step: name.to_string(),
                            source: e,
                            result: finish(total, started, step_results),
                        });
                    }
                    ExecutionMode::TearDown => {
                        tracing::warn!("[StepEngine] {} failed, continuing tear-down: {}", name, e);
                    }
                }
            }
        }
    }

    let result = finish(total, started, step_results);
    reporter.emit(
        BootstrapProgress::new(100, format!("{} finished", mode)).with_phase(mode.to_string()),
    );

    if result.success {
        tracing::info!(
            "[TIMING] {} of {} steps completed in {}ms",
            mode,
            total,
            result.duration.as_millis()
        );
    } else {
        let failures = result.failed_steps().count();
        tracing::warn!(
            "[StepEngine] {} finished with {} warnings: {}",
            mode,
            failures,
            result.error.as_deref().unwrap_or_default()
        );
    }
    Ok(result)
}
