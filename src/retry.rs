//! Fixed-budget retry loop for partition attempts
//!
//! The orchestrator gives every partition a small number of attempts. Whether a
//! failure is worth another attempt is decided by the error itself through
//! [`IsRetryable`]; how long to wait before the next one is decided by the caller,
//! since the in-progress quota and a failed download use different delays.
//!
//! # Example
//!
//! ```no_run
//! use falcon_image_export::retry::{IsRetryable, with_fixed_delay};
//! use std::time::Duration;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Busy,
//!     Gone,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Busy)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let value = with_fixed_delay(
//!     3,
//!     |_attempt| async { Ok::<_, MyError>(42) },
//!     |_err, _attempt| Duration::from_secs(60),
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::error::PartitionError;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
pub trait IsRetryable {
    /// Returns true if another attempt may succeed
    fn is_retryable(&self) -> bool;
}

/// A partition attempt is worth repeating unless job creation failed for a reason
/// other than the in-progress quota.
impl IsRetryable for PartitionError {
    fn is_retryable(&self) -> bool {
        match self {
            PartitionError::Submission(e) => e.is_quota_exceeded(),
            // Download failures (exhausted polls, transport, expired credential) abort
            // only the current job; a fresh job may still succeed
            PartitionError::Download(_) => true,
        }
    }
}

/// Run `operation` up to `max_attempts` times
///
/// `operation` receives the 1-based attempt number. After a retryable failure
/// that still leaves attempts, `before_retry` is called with the error and the
/// failed attempt number; it returns the delay to wait before the next attempt.
/// No wait follows the final attempt. `max_attempts == 0` behaves like 1.
pub async fn with_fixed_delay<F, Fut, T, E, D>(
    max_attempts: u32,
    mut operation: F,
    mut before_retry: D,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
    D: FnMut(&E, u32) -> Duration,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = before_retry(&e, attempt);

                tracing::warn!(
                    error = %e,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis(),
                    "operation failed, retrying"
                );

                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt,
                        "operation failed after all attempts exhausted"
                    );
                } else {
                    tracing::error!(error = %e, "operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}
