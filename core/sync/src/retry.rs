//! Re-driving remote calls after transport failures.
//!
//! Only errors for which [`Error::is_retryable`] holds are retried.
//! Crypto, authentication and validation failures return immediately
//! because the same inputs cannot produce a different answer.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use keyhaven_common::{Error, Result};

/// Backoff schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    /// Cap for exponential growth.
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Spread each delay by +/- 25%.
    pub jitter: bool,
}

impl RetryConfig {
    /// Schedule with `max_retries` retries and 1s initial delay.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self::new(0)
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `retry` (zero-based).
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_millis() as f64);

        let millis = if self.jitter {
            capped * (0.75 + rand::random::<f64>() * 0.5)
        } else {
            capped
        };

        Duration::from_millis(millis as u64)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Runs an operation until it succeeds, fails permanently, or the retry
/// budget is spent.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run `operation`, retrying transient failures.
    ///
    /// `label` only names the operation in log output.
    ///
    /// # Errors
    /// - The first non-retryable error
    /// - The last transient error once retries are exhausted
    pub async fn execute<F, Fut, T>(&self, label: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with_condition(label, operation, Error::is_retryable)
            .await
    }

    /// Same as [`RetryExecutor::execute`] with a caller-chosen condition.
    pub async fn execute_with_condition<F, Fut, T, C>(
        &self,
        label: &str,
        operation: F,
        should_retry: C,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
        C: Fn(&Error) -> bool,
    {
        let mut retries = 0;

        loop {
            let err = match operation().await {
                Ok(value) => {
                    if retries > 0 {
                        debug!(operation = label, retries, "Succeeded after retrying");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !should_retry(&err) {
                return Err(err);
            }
            if retries >= self.config.max_retries {
                warn!(operation = label, attempts = retries + 1, error = %err, "Giving up");
                return Err(err);
            }

            let delay = self.config.delay_for_attempt(retries);
            retries += 1;
            warn!(operation = label, attempt = retries, error = %err, ?delay, "Retrying");
            sleep(delay).await;
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}
