//! Bounded retries with an explicit retryable-error predicate
//!
//! # Examples
//!
//! ```rust,ignore
//! use photoferry_core::retry::{self, Backoff, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(3, Backoff::Linear {
//!     base: Duration::from_secs(5),
//!     cap: Duration::from_secs(60),
//! });
//! let report = retry::run_classified(&policy, |attempt| engine.transfer(&path)).await?;
//! ```

use crate::config::{BackoffKind, RetryConfig};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that know whether another attempt could help
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Delay curve between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay after every failure
    Fixed(Duration),
    /// `base * attempt`, never more than `cap`
    Linear { base: Duration, cap: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// A policy that always allows at least one attempt
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        let base = Duration::from_millis(config.base_delay_ms);
        let backoff = match config.backoff {
            BackoffKind::Fixed => Backoff::Fixed(base),
            BackoffKind::Linear => Backoff::Linear {
                base,
                cap: Duration::from_millis(config.max_delay_ms.max(config.base_delay_ms)),
            },
        };
        Self::new(config.max_attempts, backoff)
    }

    /// Delay to wait after the failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Linear { base, cap } => base.saturating_mul(attempt.max(1)).min(cap),
        }
    }
}

/// Why [`run`] gave up
///
/// Both variants keep the last error untouched so callers can report its
/// real kind rather than a generic timeout.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("non-retryable failure on attempt {attempts}: {error}")]
    Fatal { attempts: u32, error: E },

    #[error("giving up after {attempts} attempt(s): {error}")]
    Exhausted { attempts: u32, error: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Fatal { attempts, .. } | RetryError::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn error(&self) -> &E {
        match self {
            RetryError::Fatal { error, .. } | RetryError::Exhausted { error, .. } => error,
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            RetryError::Fatal { error, .. } | RetryError::Exhausted { error, .. } => error,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// `policy.max_attempts` invocations have been made
///
/// The operation receives the 1-based attempt number.
pub async fn run<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    is_retryable: P,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let mut attempt = 0;

    loop {
        attempt += 1;
        debug!("Attempt {}/{}", attempt, policy.max_attempts);

        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) if !is_retryable(&error) => {
                warn!(attempt, error = %error, "non-retryable failure");
                return Err(RetryError::Fatal {
                    attempts: attempt,
                    error,
                });
            },
            Err(error) if attempt >= policy.max_attempts => {
                warn!(attempts = attempt, error = %error, "retry budget exhausted");
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    error,
                });
            },
            Err(error) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "Attempt {}/{} failed: {}. Retrying in {:?}...",
                    attempt, policy.max_attempts, error, delay
                );
                tokio::time::sleep(delay).await;
            },
        }
    }
}

/// [`run`] with the predicate supplied by the error type itself
pub async fn run_classified<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    run(policy, E::is_retryable, operation).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq)]
    enum Failure {
        Timeout(u32),
        BadPassword,
    }

    impl Display for Failure {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Failure::Timeout(n) => write!(f, "timeout #{n}"),
                Failure::BadPassword => write!(f, "bad password"),
            }
        }
    }

    impl Retryable for Failure {
        fn is_retryable(&self) -> bool {
            matches!(self, Failure::Timeout(_))
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(
            3,
            Backoff::Linear {
                base: Duration::from_secs(5),
                cap: Duration::from_secs(60),
            },
        )
    }

    #[test]
    fn test_delay_curves() {
        let linear = policy();
        assert_eq!(linear.delay_for(1), Duration::from_secs(5));
        assert_eq!(linear.delay_for(3), Duration::from_secs(15));
        assert_eq!(linear.delay_for(100), Duration::from_secs(60));

        let fixed = RetryPolicy::new(2, Backoff::Fixed(Duration::from_millis(250)));
        assert_eq!(fixed.delay_for(1), fixed.delay_for(7));
    }

    #[test]
    fn test_policy_from_config() {
        let policy = RetryPolicy::from_config(&RetryConfig {
            max_attempts: 0,
            backoff: BackoffKind::Fixed,
            base_delay_ms: 100,
            max_delay_ms: 0,
        });
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.backoff, Backoff::Fixed(Duration::from_millis(100)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = run_classified(&policy(), |attempt| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if attempt < 3 {
                    Err(Failure::Timeout(attempt))
                } else {
                    Ok("uploaded")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "uploaded");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_reports_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let err = run_classified(&policy(), |attempt| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Failure::Timeout(attempt))
            }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(err.is_exhausted());
        assert_eq!(err.attempts(), 3);
        assert_eq!(err.into_inner(), Failure::Timeout(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let err = run_classified(&policy(), |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Failure::BadPassword)
            }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, RetryError::Fatal { attempts: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sleeps_between_attempts() {
        let start = tokio::time::Instant::now();
        let _ = run(&policy(), |_: &Failure| true, |attempt| async move {
            Err::<(), _>(Failure::Timeout(attempt))
        })
        .await;

        // 5s after the first failure, 10s after the second, none after the last
        assert_eq!(start.elapsed(), Duration::from_secs(15));
    }
}
