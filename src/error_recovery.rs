//! Bounded retry for operations whose failure is fatal to their component.
//!
//! Connection handling does not use this: links retry forever on their own. This is
//! for the persistence writer, which gets a fixed budget per snapshot before it gives
//! up and surfaces [`DaqError::PersistenceFailed`].

use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use crate::error::{AppResult, DaqError};

/// Defines a policy for retrying an operation.
///
/// # Example
///
/// ```rust
/// use sensortag_daq::error_recovery::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy {
///     max_attempts: 5,
///     backoff_delay: Duration::from_millis(200),
/// };
/// ```
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one. Values below 1 act as 1.
    pub max_attempts: u32,

    /// The delay between attempts (constant backoff).
    pub backoff_delay: Duration,
}

impl Default for RetryPolicy {
    /// Three attempts, 500ms apart.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_delay: Duration::from_millis(500),
        }
    }
}

/// Run `operation` until it succeeds, fails with a non-transient error, or the policy
/// runs out of attempts.
///
/// Every failure is logged with `what` as context. The returned error wraps the last
/// failure in [`DaqError::PersistenceFailed`].
pub async fn retry_with_policy<T, F>(policy: &RetryPolicy, what: &str, mut operation: F) -> AppResult<T>
where
    F: FnMut() -> AppResult<T>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation() {
            Ok(value) => return Ok(value),
            Err(err) => {
                let give_up = attempt >= max_attempts || !err.is_transient();
                warn!(attempt, max_attempts, error = %err, "{} failed", what);
                if give_up {
                    return Err(DaqError::PersistenceFailed {
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
                sleep(policy.backoff_delay).await;
            }
        }
    }
}
