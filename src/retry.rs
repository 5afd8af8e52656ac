//! Exponential-backoff retries shared by the parameter fetch and the socket handshake.

use crate::error::{Result, UpstoxError};
use log::*;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(180);
pub const DEFAULT_POOL_SIZE: usize = 4;

type RetryPredicate = Arc<dyn Fn(&UpstoxError) -> bool + Send + Sync>;

/// How many times to try, how long to wait in between, and which failures are worth retrying.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    retry_on: RetryPredicate,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_BACKOFF)
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_backoff", &self.initial_backoff)
            .field("max_backoff", &self.max_backoff)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// Retries every failure. `max_attempts` is clamped to at least one.
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff,
            retry_on: Arc::new(|_| true),
        }
    }

    /// Only retry failures for which `predicate` returns true; others are returned as-is.
    pub fn retry_if(
        mut self,
        predicate: impl Fn(&UpstoxError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.retry_on = Arc::new(predicate);
        self
    }

    pub fn is_retryable(&self, err: &UpstoxError) -> bool {
        (self.retry_on)(err)
    }

    /// Delay after failed attempt `attempt` (1-based): `min(initial * 2^(attempt-1), max)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        2u32.checked_pow(exponent)
            .and_then(|factor| self.initial_backoff.checked_mul(factor))
            .map_or(self.max_backoff, |delay| delay.min(self.max_backoff))
    }
}

/// Diagnostics hooks. Never used to steer the retry loop.
pub trait RetryObserver: Send + Sync {
    /// `attempt` is the attempt that just failed.
    fn on_retry(&self, _attempt: u32, _cause: &UpstoxError) {}

    fn on_success(&self, _attempts: u32) {}

    fn on_failure(&self, _attempts: u32, _cause: &UpstoxError) {}
}

/// Logs every retry event for one named operation, then forwards it to `next` if set.
pub struct LogObserver {
    operation: &'static str,
    next: Option<Arc<dyn RetryObserver>>,
}

impl LogObserver {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            next: None,
        }
    }

    pub fn with_next(mut self, next: Option<Arc<dyn RetryObserver>>) -> Self {
        self.next = next;
        self
    }
}

impl RetryObserver for LogObserver {
    fn on_retry(&self, attempt: u32, cause: &UpstoxError) {
        warn!(
            "Failure #{}. Unable to {}, retrying: {}",
            attempt, self.operation, cause
        );
        if let Some(next) = &self.next {
            next.on_retry(attempt, cause);
        }
    }

    fn on_success(&self, attempts: u32) {
        info!("Succeeded to {} after {} attempt(s).", self.operation, attempts);
        if let Some(next) = &self.next {
            next.on_success(attempts);
        }
    }

    fn on_failure(&self, attempts: u32, cause: &UpstoxError) {
        error!(
            "Failed completely to {} after {} attempt(s): {}",
            self.operation, attempts, cause
        );
        if let Some(next) = &self.next {
            next.on_failure(attempts, cause);
        }
    }
}

/// Runs operations under a [`RetryPolicy`].
///
/// Clones share one bounded pool of execution slots. An attempt holds a slot only while it
/// runs; backoff waits do not, so a chain that keeps failing cannot hold up unrelated chains
/// beyond the pool's size.
#[derive(Clone)]
pub struct RetryExecutor {
    pool: Arc<Semaphore>,
    pool_size: usize,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }
}

impl RetryExecutor {
    pub fn new(pool_size: usize) -> Self {
        let pool_size = pool_size.max(1);
        Self {
            pool: Arc::new(Semaphore::new(pool_size)),
            pool_size,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Slots not currently held by a running attempt.
    pub fn available_slots(&self) -> usize {
        self.pool.available_permits()
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable error, or the policy
    /// runs out of attempts. Exhaustion is reported as [`UpstoxError::RetryExhausted`]
    /// wrapping the last failure.
    pub async fn execute<F, Fut, T>(
        &self,
        policy: &RetryPolicy,
        observer: &dyn RetryObserver,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = {
                let _slot = self
                    .pool
                    .acquire()
                    .await
                    .map_err(|_| UpstoxError::ExecutorClosed)?;
                operation().await
            };

            let err = match outcome {
                Ok(value) => {
                    observer.on_success(attempt);
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !policy.is_retryable(&err) {
                observer.on_failure(attempt, &err);
                return Err(err);
            }
            if attempt >= policy.max_attempts {
                observer.on_failure(attempt, &err);
                return Err(UpstoxError::RetryExhausted {
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            observer.on_retry(attempt, &err);
            let delay = policy.backoff(attempt);
            debug!("Attempt {} failed, next attempt in {:?}", attempt, delay);
            sleep(delay).await;
        }
    }
}
