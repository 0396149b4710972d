/// Task Runner with Retry and Backoff
///
/// Runs one unit of fallible async work with a per-attempt timeout and
/// exponential backoff between attempts. Used by fetch tasks so that a
/// transient upstream failure does not immediately fail the task.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::domain::repositories::trade_source::FetchError;

/// Retry configuration for fetch tasks
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_retry_delay: Duration,
    /// Maximum delay between attempts
    pub max_retry_delay: Duration,
    /// Upper bound for a single attempt
    pub attempt_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_retry_delay: Duration::from_millis(250),
            max_retry_delay: Duration::from_secs(5),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

/// Internal backoff state
#[derive(Debug)]
struct BackoffState {
    attempts: u32,
    current_retry_delay: Duration,
}

impl BackoffState {
    fn new(initial_delay: Duration) -> Self {
        Self {
            attempts: 0,
            current_retry_delay: initial_delay,
        }
    }

    fn advance(&mut self, max_delay: Duration) -> Duration {
        let delay = self.current_retry_delay;
        self.current_retry_delay = std::cmp::min(self.current_retry_delay * 2, max_delay);
        delay
    }
}

/// Run `task_fn` until it succeeds, fails with a non-retryable error, or
/// `max_attempts` is reached. Returns the last error on failure.
pub async fn retry_with_backoff<T, F, Fut>(
    task_name: &str,
    config: &RetryConfig,
    mut task_fn: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut state = BackoffState::new(config.initial_retry_delay);
    let max_attempts = config.max_attempts.max(1);

    loop {
        state.attempts += 1;

        let outcome = match timeout(config.attempt_timeout, task_fn()).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(config.attempt_timeout.as_millis() as u64)),
        };

        match outcome {
            Ok(value) => {
                if state.attempts > 1 {
                    debug!(task = task_name, attempts = state.attempts, "Task recovered after retry");
                }
                return Ok(value);
            }
            Err(e) if !e.is_retryable() || state.attempts >= max_attempts => {
                warn!(
                    task = task_name,
                    attempts = state.attempts,
                    error = %e,
                    "Task failed, giving up"
                );
                return Err(e);
            }
            Err(e) => {
                let delay = state.advance(config.max_retry_delay);
                warn!(
                    task = task_name,
                    attempt = state.attempts,
                    max_attempts,
                    error = %e,
                    "Task failed, retrying in {:?}",
                    delay
                );
                sleep(delay).await;
            }
        }
    }
}
