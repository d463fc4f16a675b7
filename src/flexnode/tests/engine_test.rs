mod common;

use common::{CallLog, RecordingStep};
use flexnode::{run_steps, ExecutionMode, StepEntry, TracingProgressReporter};
use std::sync::atomic::Ordering;
use tokio_util::sync::CancellationToken;

fn log() -> CallLog {
    CallLog::default()
}

#[tokio::test]
async fn empty_build_up_succeeds() {
    let result = run_steps(
        &[],
        ExecutionMode::BuildUp,
        &CancellationToken::new(),
        &TracingProgressReporter,
    )
    .await
    .unwrap();

    assert!(result.success);
    assert_eq!(result.step_count, 0);
    assert!(result.step_results.is_empty());
    assert!(result.error.is_none());
}

#[tokio::test]
async fn build_up_stops_at_first_failure() {
    let log = log();
    let third = RecordingStep::new("kubelet", &log);
    let third_runs = third.counter();
    let steps = vec![
        StepEntry::plain(RecordingStep::new("containerd", &log)),
        StepEntry::plain(RecordingStep::new("runc", &log).failing()),
        StepEntry::plain(third),
    ];

    let err = run_steps(
        &steps,
        ExecutionMode::BuildUp,
        &CancellationToken::new(),
        &TracingProgressReporter,
    )
    .await
    .unwrap_err();

    assert_eq!(err.step, "runc");
    assert!(err.to_string().contains("runc"));
    assert!(!err.result.success);
    assert_eq!(err.result.step_count, 3);
    assert_eq!(err.result.step_results.len(), 2);
    assert!(err.result.step_results[0].success);
    assert!(!err.result.step_results[1].success);
    assert!(err.result.error.as_deref().unwrap().contains("runc"));
    assert_eq!(third_runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn completed_steps_are_not_executed() {
    let log = log();
    let done = RecordingStep::new("system-prep", &log).completed();
    let done_runs = done.counter();
    let steps = vec![
        StepEntry::validating(done),
        StepEntry::plain(RecordingStep::new("containerd", &log)),
    ];

    let result = run_steps(
        &steps,
        ExecutionMode::BuildUp,
        &CancellationToken::new(),
        &TracingProgressReporter,
    )
    .await
    .unwrap();

    assert!(result.success);
    assert_eq!(done_runs.load(Ordering::SeqCst), 0);
    assert_eq!(result.step_results[0].duration, std::time::Duration::ZERO);
    assert_eq!(*log.lock().unwrap(), vec!["execute:containerd".to_string()]);
}

#[tokio::test]
async fn failed_validation_skips_execute() {
    let log = log();
    let invalid = RecordingStep::new("arc-registration", &log).invalid();
    let runs = invalid.counter();
    let steps = vec![StepEntry::validating(invalid)];

    let err = run_steps(
        &steps,
        ExecutionMode::BuildUp,
        &CancellationToken::new(),
        &TracingProgressReporter,
    )
    .await
    .unwrap_err();

    assert_eq!(err.step, "arc-registration");
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(
        *log.lock().unwrap(),
        vec!["validate:arc-registration".to_string()]
    );
}

#[tokio::test]
async fn tear_down_runs_every_step_and_reports_failures() {
    let log = log();
    let steps: Vec<StepEntry> = vec![
        StepEntry::plain(RecordingStep::new("stop-services", &log).failing()),
        StepEntry::validating(RecordingStep::new("arc-deregistration", &log).invalid()),
        StepEntry::plain(RecordingStep::new("remove-node-files", &log).failing()),
    ];

    let result = run_steps(
        &steps,
        ExecutionMode::TearDown,
        &CancellationToken::new(),
        &TracingProgressReporter,
    )
    .await
    .unwrap();

    assert!(!result.success);
    assert_eq!(result.step_results.len(), 3);
    assert_eq!(result.failed_steps().count(), 2);
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "execute:stop-services".to_string(),
            "execute:arc-deregistration".to_string(),
            "execute:remove-node-files".to_string(),
        ]
    );
    let error = result.error.unwrap();
    assert!(error.starts_with("2 of 3 steps failed"));
}

#[tokio::test]
async fn cancelled_build_up_attempts_nothing() {
    let log = log();
    let step = RecordingStep::new("containerd", &log);
    let runs = step.counter();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = run_steps(
        &[StepEntry::plain(step)],
        ExecutionMode::BuildUp,
        &cancel,
        &TracingProgressReporter,
    )
    .await
    .unwrap_err();

    assert!(err.source.is_cancelled());
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancelled_tear_down_reports_unattempted_steps() {
    let log = log();
    let first = RecordingStep::new("stop-services", &log);
    let second = RecordingStep::new("remove-node-files", &log);
    let (first_runs, second_runs) = (first.counter(), second.counter());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = run_steps(
        &[StepEntry::plain(first), StepEntry::plain(second)],
        ExecutionMode::TearDown,
        &cancel,
        &TracingProgressReporter,
    )
    .await
    .unwrap();

    assert!(!result.success);
    assert_eq!(result.step_count, 2);
    assert_eq!(result.step_results.len(), 2);
    assert_eq!(result.failed_steps().count(), 2);
    assert!(result.error.unwrap().contains("cancelled with 2 of 2 steps not attempted"));
    assert_eq!(first_runs.load(Ordering::SeqCst), 0);
    assert_eq!(second_runs.load(Ordering::SeqCst), 0);
}
