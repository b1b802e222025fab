//! Retry logic with exponential backoff for transient provider errors.

use std::thread;
use std::time::Duration;

use crate::error::ProviderError;
use crate::types::{RetryConfig, Urn};

/// Callback trait for retry progress notifications.
pub trait RetryCallback {
    /// Called when an operation is being retried.
    ///
    /// # Arguments
    /// * `attempt` - Attempt that just failed (1-indexed)
    /// * `max_attempts` - Maximum number of attempts
    /// * `error` - The error that triggered the retry
    /// * `delay` - Time until the next attempt
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &ProviderError, delay: Duration);
}

/// No-op callback that does nothing.
pub struct NoCallback;

impl RetryCallback for NoCallback {
    fn on_retry(&self, _attempt: u32, _max_attempts: u32, _error: &ProviderError, _delay: Duration) {
    }
}

/// Callback that logs retries of one resource's operation.
pub struct LogCallback<'a> {
    pub urn: &'a Urn,
}

impl RetryCallback for LogCallback<'_> {
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &ProviderError, delay: Duration) {
        log::warn!(
            "{}: attempt {attempt}/{max_attempts} failed: {error}. Retrying in {}ms",
            self.urn,
            delay.as_millis()
        );
    }
}

/// Execute a provider operation with retry logic.
///
/// Retryable errors are retried with exponential backoff until
/// `config.max_attempts` is reached. Returns the final result together with
/// the number of attempts made.
pub fn with_retry<T, F>(
    config: &RetryConfig,
    callback: &dyn RetryCallback,
    mut operation: F,
) -> (Result<T, ProviderError>, u32)
where
    F: FnMut() -> Result<T, ProviderError>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation() {
            Ok(value) => return (Ok(value), attempt),
            Err(e) if !e.is_retryable() || attempt >= max_attempts => return (Err(e), attempt),
            Err(e) => {
                let delay = config.delay_for_attempt(attempt - 1);
                callback.on_retry(attempt, max_attempts, &e, delay);
                thread::sleep(delay);
            }
        }
    }
}
