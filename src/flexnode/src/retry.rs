//! Bounded retry and polling helpers shared by every phase that waits on the control plane.
//!
//! Both helpers race their sleeps against the ambient cancellation token, so a
//! shutdown never waits out the remaining backoff interval.

use crate::provisioner::ProvisionError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Exponential backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    /// Upper bound of the random extra delay, as a fraction of the backoff (0.0 disables).
    pub jitter: f64,
}

impl RetryPolicy {
    pub const fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
            jitter: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Deterministic backoff after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Backoff plus jitter; this is what the retry loop actually sleeps.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let backoff = self.backoff(attempt);
        if self.jitter <= 0.0 {
            return backoff;
        }
        let factor = rand::thread_rng().gen_range(0.0..=self.jitter);
        backoff + backoff.mul_f64(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30), 5)
    }
}

/// Sleep for `delay` unless the token fires first.
pub async fn sleep_or_cancel(
    delay: Duration,
    cancel: &CancellationToken,
) -> Result<(), ProvisionError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ProvisionError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the attempt bound is hit.
///
/// The closure receives the 1-based attempt number. Only errors for which
/// [`ProvisionError::is_retryable`] is true are retried; callers map
/// domain-specific transient signatures (e.g. replication lag) onto
/// [`ProvisionError::NotReady`] before returning them.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    op_name: &str,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, ProvisionError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ProvisionError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return Err(ProvisionError::Cancelled);
        }

        let err = match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(
                        op = op_name,
                        attempt,
                        "[Retry] {} succeeded after {} attempts",
                        op_name,
                        attempt
                    );
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if err.is_cancelled() || !err.is_retryable() {
            return Err(err);
        }
        if attempt >= max_attempts {
            tracing::error!(
                op = op_name,
                attempt,
                "[Retry] {} exhausted {} attempts: {}",
                op_name,
                max_attempts,
                err
            );
            return Err(ProvisionError::RetriesExhausted {
                op: op_name.to_string(),
                attempts: attempt,
                source: Box::new(err),
            });
        }

        let delay = policy.delay_for(attempt);
        tracing::warn!(
            op = op_name,
            attempt,
            "[Retry] {} attempt {}/{} failed: {} (retrying in {}ms)",
            op_name,
            attempt,
            max_attempts,
            err,
            delay.as_millis()
        );
        sleep_or_cancel(delay, cancel).await?;
    }
}

/// Poll `probe` at a fixed interval until it yields a value or `deadline` elapses.
///
/// `Ok(None)` means "not yet". Retryable errors are logged and polling
/// continues; any other error aborts the wait.
pub async fn poll_until<T, F, Fut>(
    what: &str,
    interval: Duration,
    deadline: Duration,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<T, ProvisionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, ProvisionError>>,
{
    let start = Instant::now();
    let mut polls = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(ProvisionError::Cancelled);
        }
        polls += 1;
        match probe().await {
            Ok(Some(value)) => {
                tracing::info!(
                    "[Poll] {} satisfied after {} polls ({:?})",
                    what,
                    polls,
                    start.elapsed()
                );
                return Ok(value);
            }
            Ok(None) => {
                tracing::debug!("[Poll] {} not yet satisfied (poll {})", what, polls);
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!("[Poll] {} probe failed (poll {}): {}", what, polls, e);
            }
            Err(e) => return Err(e),
        }

        if start.elapsed() >= deadline {
            return Err(ProvisionError::Timeout(format!(
                "{} not satisfied within {:?}",
                what, deadline
            )));
        }
        sleep_or_cancel(interval, cancel).await?;
    }
}
