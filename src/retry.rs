//! Retry utilities with exponential backoff and jitter.
//!
//! Used by the connection actor to establish its long-lived session: each dial
//! attempt is short, and the loop as a whole is bounded by a time budget
//! rather than an attempt count.
//!
//! # Example
//!
//! ```ignore
//! use failover_probe::retry::{retry_with_backoff, RetryConfig};
//!
//! let stream = retry_with_backoff(
//!     &RetryConfig::with_budget(Duration::from_secs(60)),
//!     "dial",
//!     || async { dial_once(addr).await },
//! ).await?;
//! ```

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{error, warn};

/// Configuration for operations that may fail transiently.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = unlimited)
    pub max_attempts: u32,
    /// Total time budget across all attempts (None = unlimited)
    pub max_elapsed: Option<Duration>,
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
            max_attempts: 0,
            max_elapsed: None,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a config bounded by total elapsed time
    pub fn with_budget(budget: Duration) -> Self {
        Self {
            max_elapsed: Some(budget),
            ..Default::default()
        }
    }
}

/// Execute an async operation with exponential backoff and jitter.
///
/// Retries until success, until `max_attempts` is reached, or until the next
/// sleep would cross `max_elapsed`. The last error is returned when retries
/// are exhausted.
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
    let start = Instant::now();
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

                if let Some(budget) = config.max_elapsed {
                    if start.elapsed() + jittered_delay > budget {
                        error!(
                            operation = %operation_name,
                            attempt = attempt,
                            error = %e,
                            budget_ms = budget.as_millis(),
                            "Operation failed within time budget"
                        );
                        return Err(e);
                    }
                }

                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = jittered_delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(jittered_delay).await;

                // Exponential backoff, capped at max_delay
                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_multiplier)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
        }
    }
}
