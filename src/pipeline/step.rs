use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::RetryConfig;
use crate::error::AppError;

/// How a single step attempt went wrong.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("{0}")]
    Retryable(AppError),

    #[error("{0}")]
    Fatal(AppError),
}

impl From<AppError> for StepError {
    fn from(err: AppError) -> Self {
        if err.is_retryable() {
            StepError::Retryable(err)
        } else {
            StepError::Fatal(err)
        }
    }
}

/// A step that gave up, either on a fatal error or after its last attempt.
#[derive(Debug, Error)]
#[error("step {step} failed after {attempts} attempt(s): {error}")]
pub struct StepFailure {
    pub step: &'static str,
    pub attempts: u32,
    pub error: AppError,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub step_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            step_timeout: config.step_timeout(),
        }
    }

    /// Delay before the attempt following `attempt` (1-based): the base delay
    /// doubled per prior attempt, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Runs the named steps of one job in order.
///
/// Each step is retried on its own; steps that already succeeded in this job
/// are answered from the memo instead of running again.
pub struct StepRunner {
    job: &'static str,
    policy: RetryPolicy,
    memo: HashMap<&'static str, Value>,
}

impl StepRunner {
    pub fn new(job: &'static str, policy: RetryPolicy) -> Self {
        Self {
            job,
            policy,
            memo: HashMap::new(),
        }
    }

    pub async fn run<T, F, Fut>(&mut self, step: &'static str, mut attempt_fn: F) -> Result<T, StepFailure>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StepError>>,
    {
        if let Some(value) = self
            .memo
            .get(step)
            .and_then(|v| serde_json::from_value::<T>(v.clone()).ok())
        {
            tracing::debug!("{}: step {} already completed", self.job, step);
            return Ok(value);
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            tracing::debug!("{}: step {} attempt {}", self.job, step, attempt);

            let result = match tokio::time::timeout(self.policy.step_timeout, attempt_fn()).await {
                Ok(result) => result,
                Err(_) => Err(StepError::Retryable(AppError::Timeout(format!(
                    "step {} exceeded {:?}",
                    step, self.policy.step_timeout
                )))),
            };

            match result {
                Ok(value) => {
                    if let Ok(memo) = serde_json::to_value(&value) {
                        self.memo.insert(step, memo);
                    }
                    return Ok(value);
                }
                Err(StepError::Fatal(error)) => {
                    return Err(StepFailure {
                        step,
                        attempts: attempt,
                        error,
                    });
                }
                Err(StepError::Retryable(error)) if attempt >= self.policy.max_attempts => {
                    return Err(StepFailure {
                        step,
                        attempts: attempt,
                        error,
                    });
                }
                Err(StepError::Retryable(error)) => {
                    let delay = self.policy.delay_for(attempt);
                    tracing::warn!(
                        "{}: step {} attempt {} failed, retrying in {:?}: {}",
                        self.job,
                        step,
                        attempt,
                        delay,
                        error
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        step_timeout: Duration::from_secs(5),
    }
}
