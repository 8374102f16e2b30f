//! Retry and rate-limit policies for collaborator calls
//!
//! Policies are plain values constructed from configuration and passed to
//! whoever calls an index or the embedding service. Tests build them with
//! zero delays so no wall-clock sleeping happens.

use crate::config::{RetrievalConfig, RetryStrategy};
use crate::errors::{AppError, Result};
use backoff::backoff::{Constant, Stop};
use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;
use governor::{
    clock::QuantaClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Token-bucket limiter shared by every caller of one collaborator
pub type GlobalRateLimiter = RateLimiter<NotKeyed, InMemoryState, QuantaClock>;

/// Create a rate limiter. Zero values are raised to one.
pub fn create_rate_limiter(requests_per_second: u32, burst: u32) -> Arc<GlobalRateLimiter> {
    let per_second = NonZeroU32::new(requests_per_second.max(1)).unwrap_or(NonZeroU32::MIN);
    let burst = NonZeroU32::new(burst.max(1)).unwrap_or(NonZeroU32::MIN);
    let quota = Quota::per_second(per_second).allow_burst(burst);

    Arc::new(RateLimiter::direct(quota))
}

/// How failed calls are retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Single attempt
    None,
    /// Constant delay between attempts
    Fixed { delay: Duration, max_attempts: u32 },
    /// Exponential backoff with jitter starting at `initial`
    Exponential { initial: Duration, max_attempts: u32 },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::None
    }
}

impl RetryPolicy {
    pub fn from_config(strategy: RetryStrategy, max_attempts: u32, initial_delay_ms: u64) -> Self {
        let delay = Duration::from_millis(initial_delay_ms);
        match strategy {
            RetryStrategy::None => RetryPolicy::None,
            _ if max_attempts <= 1 => RetryPolicy::None,
            RetryStrategy::Fixed => RetryPolicy::Fixed {
                delay,
                max_attempts,
            },
            RetryStrategy::Exponential => RetryPolicy::Exponential {
                initial: delay,
                max_attempts,
            },
        }
    }

    pub fn max_attempts(&self) -> u32 {
        match self {
            RetryPolicy::None => 1,
            RetryPolicy::Fixed { max_attempts, .. } | RetryPolicy::Exponential { max_attempts, .. } => {
                (*max_attempts).max(1)
            }
        }
    }

    /// Run `op` until it succeeds, fails permanently or runs out of attempts
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 0u32;

        let call = || {
            attempt += 1;
            let current = attempt;
            let fut = op();
            async move {
                fut.await.map_err(|e| {
                    if current >= max_attempts || !is_transient(&e) {
                        backoff::Error::permanent(e)
                    } else {
                        warn!(
                            operation,
                            attempt = current,
                            max_attempts,
                            error = %e,
                            "Collaborator call failed, retrying"
                        );
                        backoff::Error::transient(e)
                    }
                })
            }
        };

        match *self {
            RetryPolicy::None => retry(Stop {}, call).await,
            RetryPolicy::Fixed { delay, .. } => retry(Constant::new(delay), call).await,
            RetryPolicy::Exponential { initial, .. } => {
                let schedule = ExponentialBackoffBuilder::new()
                    .with_initial_interval(initial)
                    .with_max_elapsed_time(None)
                    .build();
                retry(schedule, call).await
            }
        }
    }
}

/// Errors worth another attempt
pub fn is_transient(err: &AppError) -> bool {
    matches!(
        err,
        AppError::Index { .. }
            | AppError::Database(_)
            | AppError::DatabaseConnection { .. }
            | AppError::EmbeddingError { .. }
            | AppError::EmbeddingTimeout { .. }
            | AppError::HttpClient(_)
            | AppError::ServiceUnavailable { .. }
    )
}

/// Rate limiting plus retry, applied around each index sub-query
#[derive(Clone, Default)]
pub struct SearchPolicy {
    limiter: Option<Arc<GlobalRateLimiter>>,
    retry: RetryPolicy,
}

impl SearchPolicy {
    pub fn new(limiter: Option<Arc<GlobalRateLimiter>>, retry: RetryPolicy) -> Self {
        Self { limiter, retry }
    }

    /// Single attempt, no limiter
    pub fn immediate() -> Self {
        Self::default()
    }

    pub fn from_config(config: &RetrievalConfig) -> Self {
        let limiter = (config.index_requests_per_second > 0)
            .then(|| create_rate_limiter(config.index_requests_per_second, config.index_burst));
        let retry = RetryPolicy::from_config(
            config.retry_strategy,
            config.retry_max_attempts,
            config.retry_initial_delay_ms,
        );
        Self { limiter, retry }
    }

    /// Wait for a limiter permit, then run `op` under the retry policy.
    /// Every retry waits for a fresh permit.
    pub async fn execute<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let limiter = self.limiter.clone();
        self.retry
            .run(operation, || {
                let limiter = limiter.clone();
                let fut = op();
                async move {
                    if let Some(limiter) = limiter {
                        limiter.until_ready().await;
                    }
                    fut.await
                }
            })
            .await
    }
}

impl std::fmt::Debug for SearchPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchPolicy")
            .field("rate_limited", &self.limiter.is_some())
            .field("retry", &self.retry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_rate_limiter_creation() {
        let limiter = create_rate_limiter(100, 200);
        assert!(limiter.check().is_ok());

        let clamped = create_rate_limiter(0, 0);
        assert!(clamped.check().is_ok());
    }

    #[test]
    fn test_policy_from_config() {
        let policy = RetryPolicy::from_config(RetryStrategy::Fixed, 3, 0);
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(
            RetryPolicy::from_config(RetryStrategy::Exponential, 1, 50),
            RetryPolicy::None
        );
    }

    #[tokio::test]
    async fn test_fixed_retry_recovers() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::Fixed {
            delay: Duration::ZERO,
            max_attempts: 3,
        };

        let result = policy
            .run("lexical", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(AppError::index("lexical", "flaky"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_stops_at_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::Fixed {
            delay: Duration::ZERO,
            max_attempts: 2,
        };

        let result: Result<()> = policy
            .run("vector", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AppError::index("vector", "down")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::Fixed {
            delay: Duration::ZERO,
            max_attempts: 5,
        };

        let result: Result<()> = policy
            .run("lexical", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AppError::Cancelled) }
            })
            .await;

        assert!(matches!(result, Err(AppError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_search_policy_with_limiter() {
        let policy = SearchPolicy::new(Some(create_rate_limiter(1000, 10)), RetryPolicy::None);
        let value = policy.execute("lexical", || async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }
}
