//! Retry manager for handling transient failures with exponential backoff
//!
//! This module provides a retry mechanism with configurable backoff strategy,
//! jitter, and maximum retry limits. A `Retry-After` hint from the remote side
//! is honoured as a lower bound for the next delay.

use crate::config::RetryConfig;
use crate::error::RetryableError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry manager with exponential backoff support
#[derive(Debug, Clone)]
pub struct RetryManager {
    config: RetryConfig,
}

impl RetryManager {
    /// Create a new RetryManager with the given configuration
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Create a RetryManager with default configuration
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Execute an async operation with retry logic
    ///
    /// The operation will be retried up to `max_retries` times if it returns
    /// a retryable error. Each retry waits for an exponentially increasing
    /// backoff period, or longer if the error asks for it.
    ///
    /// # Returns
    ///
    /// The result of the operation, or the last error if all retries are exhausted
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError + std::fmt::Display,
    {
        let mut attempt = 0u32;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    if attempt >= self.config.max_retries {
                        warn!(
                            attempts = attempt + 1,
                            max_retries = self.config.max_retries,
                            status = err.status_code().unwrap_or(0),
                            error = %err,
                            "Max retries exhausted"
                        );
                        return Err(err);
                    }

                    let backoff = self.backoff_for(attempt, &err);
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        status = err.status_code().unwrap_or(0),
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Retrying after transient error"
                    );

                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Backoff for a failed attempt, raised to the error's retry-after hint
    pub fn backoff_for<E: RetryableError>(&self, attempt: u32, err: &E) -> Duration {
        let backoff = self.calculate_backoff(attempt);
        match err.retry_after_secs() {
            Some(secs) => backoff.max(Duration::from_secs(secs)),
            None => backoff,
        }
    }

    /// Calculate backoff duration for a given attempt number
    ///
    /// Uses exponential backoff: initial_backoff * multiplier^attempt
    /// Capped at max_backoff_secs with optional jitter
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let base =
            self.config.initial_backoff_secs * self.config.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.config.max_backoff_secs).max(0.0);

        let delay = if self.config.jitter {
            // Add jitter: 50-100% of the calculated backoff
            let jitter = rand::thread_rng().gen_range(0.5..1.0);
            capped * jitter
        } else {
            capped
        };

        Duration::from_secs_f64(delay)
    }

    /// Get the retry configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}
