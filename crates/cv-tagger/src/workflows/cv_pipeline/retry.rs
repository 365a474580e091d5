use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

use super::error::PipelineError;

/// Exponential backoff with additive jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Backoff before the attempt following `attempt` (1-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let seconds = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter = if self.jitter.is_zero() {
            Duration::ZERO
        } else {
            rand::thread_rng().gen_range(Duration::ZERO..=self.jitter)
        };
        self.base_delay(attempt).saturating_add(jitter)
    }
}

/// Notified before every backoff sleep.
pub trait RetryObserver: Send + Sync {
    fn on_retry(&self, operation: &str, attempt: u32, delay: Duration, error: &PipelineError);
}

#[derive(Debug, Default)]
pub struct TracingRetryObserver;

impl RetryObserver for TracingRetryObserver {
    fn on_retry(&self, operation: &str, attempt: u32, delay: Duration, error: &PipelineError) {
        warn!(
            operation,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "transient failure, retrying"
        );
    }
}

/// Re-invokes a failing operation while its errors stay transient.
#[derive(Clone)]
pub struct RetryExecutor {
    policy: Arc<RetryPolicy>,
    observer: Arc<dyn RetryObserver>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
            observer: Arc::new(TracingRetryObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RetryObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Runs `operation` until it succeeds, fails permanently, or `max_attempts` is reached.
    ///
    /// Non-transient errors are returned unchanged after a single attempt; exhausting the
    /// budget on transient errors yields [`PipelineError::RetryExhausted`].
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        mut attempt_fn: F,
    ) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let error = match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(error) if !error.is_transient() => return Err(error),
                Err(error) => error,
            };

            if attempt >= max_attempts {
                return Err(PipelineError::RetryExhausted {
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            let delay = self.policy.delay_for(attempt);
            self.notify(operation, attempt, delay, &error);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    fn notify(&self, operation: &str, attempt: u32, delay: Duration, error: &PipelineError) {
        let observer = &self.observer;
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            observer.on_retry(operation, attempt, delay, error)
        }));
        if outcome.is_err() {
            error!(operation, attempt, "retry observer panicked; continuing");
        }
    }
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
