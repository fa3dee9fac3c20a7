//! Retry utilities for transient failures.
//!
//! Two flavors:
//!
//! - [`retry_with_backoff`] for any async operation that may fail
//!   transiently, with exponential backoff and jitter to avoid thundering
//!   herd problems.
//! - [`retry_on_conflict`] for Kubernetes read-modify-write loops, which
//!   retries immediately (bounded) on optimistic-concurrency conflicts
//!   (HTTP 409) and gives up on anything else.

use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

use crate::error::Error;

/// Configuration for operations that may fail transiently.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = infinite)
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0, // infinite
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a config with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }
}

/// Execute an async operation with exponential backoff and jitter.
///
/// Retries indefinitely (or up to `max_attempts` if set) until success.
///
/// # Arguments
/// * `config` - Retry configuration
/// * `operation_name` - Name for logging purposes
/// * `operation` - The async operation to retry
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if config.max_attempts > 0 && attempt >= config.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                // Add jitter: 0.5x to 1.5x of the delay
                let jitter = rand::thread_rng().gen_range(0.5..1.5);
                let jittered_delay = Duration::from_secs_f64(delay.as_secs_f64() * jitter);

                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = jittered_delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(jittered_delay).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_multiplier)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
        }
    }
}

/// Retry a Kubernetes read-modify-write operation on write conflicts.
///
/// The operation is expected to re-read the resource on each attempt, so a
/// 409 simply means another writer got there first and a re-read will pick
/// up the new resourceVersion. Non-conflict errors are returned immediately.
///
/// # Arguments
/// * `max_attempts` - Attempt budget (must be at least 1)
/// * `operation_name` - Name for logging purposes
/// * `operation` - The read-modify-write operation to retry
pub async fn retry_on_conflict<F, Fut, T>(
    max_attempts: u32,
    operation_name: &str,
    mut operation: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_conflict() && attempt < max_attempts => {
                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    "write conflict, retrying with fresh read"
                );
            }
            Err(e) => {
                if e.is_conflict() {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        "write conflict persisted past retry budget"
                    );
                }
                return Err(e);
            }
        }
    }
}
