//! Bounded retry with a fixed backoff, used for the first client connection.

use std::fmt;
use std::future::Future;
use std::time::Duration;

/// How many times to try, and how long to sleep in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Never less than one.
    pub max_attempts: u32,
    /// Sleep between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 120,
            backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

/// How the first connection to a started instance is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    /// One attempt; failures surface immediately.
    Strict,
    /// Retry under the given policy before giving up.
    Tolerant(RetryPolicy),
}

impl Default for ConnectMode {
    fn default() -> Self {
        Self::Tolerant(RetryPolicy::default())
    }
}

impl ConnectMode {
    /// The policy this mode runs under. Strict is a single attempt.
    pub fn policy(&self) -> RetryPolicy {
        match self {
            Self::Strict => RetryPolicy::new(1, Duration::ZERO),
            Self::Tolerant(policy) => *policy,
        }
    }
}

/// The operation failed on every attempt.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    /// Attempts made.
    pub attempts: u32,
    /// Error from the last attempt.
    pub last_error: E,
}

impl<E: fmt::Display> fmt::Display for RetryExhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gave up after {} attempts: {}", self.attempts, self.last_error)
    }
}

/// Run `op` until it succeeds or the policy is exhausted.
pub async fn retry<T, E, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, RetryExhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!("Succeeded on attempt {}/{}", attempt, max_attempts);
                }
                return Ok(value);
            }
            Err(e) if attempt >= max_attempts => {
                return Err(RetryExhausted {
                    attempts: attempt,
                    last_error: e,
                });
            }
            Err(e) => {
                tracing::debug!(
                    "Attempt {}/{} failed: {}; retrying in {:?}",
                    attempt,
                    max_attempts,
                    e,
                    policy.backoff
                );
                tokio::time::sleep(policy.backoff).await;
                attempt += 1;
            }
        }
    }
}
