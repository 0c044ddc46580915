//! Bounded exponential-backoff retry around one attempt of an operation
//!
//! Attempt `n` (1-based) that fails with a retryable error is followed by a
//! delay of `min(max_delay, base_delay * multiplier^(n-1))`. There is no
//! jitter. Delays are awaited against the caller's [`CancellationToken`], and
//! cancellation always surfaces as [`ResilienceError::Cancelled`], never as
//! an exhausted retry.
//!
//! Whether an error is retried is decided by a [`RetryPolicy`]. The default
//! policy consults [`ErrorClassification`]: network and timeout failures are
//! retried, validation, argument and cancellation failures are not.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::circuit_breaker::CircuitState;
use super::error::{ResilienceError, ResilienceResult};
use crate::error::{ConfigError, ConfigResult, ErrorClassification};
use crate::utils::duration_millis;

/// Decision returned by a [`RetryPolicy`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the configured backoff delay
    Retry,
    /// Retry after a specific delay (capped at `max_delay`)
    RetryAfter(Duration),
    /// Give up and propagate the error
    Stop,
}

/// Trait for determining whether an error should be retried
pub trait RetryPolicy<E>: Send + Sync {
    /// `attempt` is the 1-based number of the attempt that just failed
    fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision;
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    #[serde(rename = "base_delay_ms", with = "duration_millis")]
    pub base_delay: Duration,
    /// Upper bound for any single delay
    #[serde(rename = "max_delay_ms", with = "duration_millis")]
    pub max_delay: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts", "must be at least 1"));
        }
        if !self.multiplier.is_finite() || self.multiplier <= 1.0 {
            return Err(ConfigError::invalid("multiplier", "must be a finite value above 1.0"));
        }
        if self.max_delay < self.base_delay {
            return Err(ConfigError::invalid("max_delay", "must not be below base_delay"));
        }
        Ok(())
    }

    /// Backoff delay following the failed attempt number `attempt` (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs).map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Builder for [`RetryConfig`]
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.config.multiplier = multiplier;
        self
    }

    pub fn build(self) -> ConfigResult<RetryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Outcome of a retry execution including summary statistics
#[derive(Debug)]
pub struct RetryOutcome<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub result: ResilienceResult<T, E>,
    /// Attempts actually started
    pub attempts: u32,
    /// Sum of the backoff delays that were fully awaited
    pub total_delay: Duration,
}

impl<T, E> RetryOutcome<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn into_result(self) -> ResilienceResult<T, E> {
        self.result
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Retry executor parameterized by its policy
#[derive(Debug, Clone)]
pub struct RetryExecutor<P = policies::DefaultRetryPolicy> {
    config: RetryConfig,
    policy: P,
}

impl RetryExecutor<policies::DefaultRetryPolicy> {
    /// Executor with the classification-based default policy
    pub fn from_config(config: RetryConfig) -> ConfigResult<Self> {
        Self::new(config, policies::DefaultRetryPolicy)
    }
}

impl<P> RetryExecutor<P> {
    pub fn new(config: RetryConfig, policy: P) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self { config, policy })
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation` until it succeeds, the policy stops, attempts run out
    /// or `cancel` fires
    #[instrument(skip_all, fields(max_attempts = self.config.max_attempts))]
    pub async fn execute<F, Fut, T, E>(
        &self,
        cancel: &CancellationToken,
        operation: F,
    ) -> ResilienceResult<T, E>
    where
        P: RetryPolicy<E>,
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.execute_with_outcome(cancel, operation).await.into_result()
    }

    /// Same as [`execute`](Self::execute) but also reports attempts and delay
    pub async fn execute_with_outcome<F, Fut, T, E>(
        &self,
        cancel: &CancellationToken,
        operation: F,
    ) -> RetryOutcome<T, E>
    where
        P: RetryPolicy<E>,
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.run(cancel, || Ok(()), operation).await
    }

    /// Retry loop with a `gate` consulted before every attempt after the
    /// first; a closed gate ends the loop with `CircuitOpen`
    pub(crate) async fn run<G, F, Fut, T, E>(
        &self,
        cancel: &CancellationToken,
        gate: G,
        mut operation: F,
    ) -> RetryOutcome<T, E>
    where
        P: RetryPolicy<E>,
        G: Fn() -> Result<(), CircuitState>,
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let mut total_delay = Duration::ZERO;
        let mut attempt = 0;

        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return RetryOutcome {
                    result: Err(ResilienceError::Cancelled),
                    attempts: attempt - 1,
                    total_delay,
                };
            }
            if attempt > 1 {
                if let Err(state) = gate() {
                    debug!(attempt, %state, "gate closed, abandoning retries");
                    return RetryOutcome {
                        result: Err(ResilienceError::CircuitOpen { state }),
                        attempts: attempt - 1,
                        total_delay,
                    };
                }
            }
            debug!(attempt, max_attempts = self.config.max_attempts, "executing attempt");

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(attempt, "cancelled during attempt");
                    return RetryOutcome { result: Err(ResilienceError::Cancelled), attempts: attempt, total_delay };
                }
                result = operation(cancel.clone()) => result,
            };

            let error = match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retries");
                    }
                    return RetryOutcome { result: Ok(value), attempts: attempt, total_delay };
                }
                Err(error) => error,
            };

            if cancel.is_cancelled() {
                return RetryOutcome {
                    result: Err(ResilienceError::Cancelled),
                    attempts: attempt,
                    total_delay,
                };
            }

            let delay = match self.policy.should_retry(&error, attempt) {
                RetryDecision::Stop => {
                    debug!(attempt, %error, "error is not retryable");
                    return RetryOutcome {
                        result: Err(ResilienceError::OperationFailed { source: error }),
                        attempts: attempt,
                        total_delay,
                    };
                }
                _ if attempt >= self.config.max_attempts => {
                    warn!(attempts = attempt, %error, "all retry attempts exhausted");
                    return RetryOutcome {
                        result: Err(ResilienceError::RetryExhausted { attempts: attempt, source: error }),
                        attempts: attempt,
                        total_delay,
                    };
                }
                RetryDecision::Retry => self.config.delay_for_attempt(attempt),
                RetryDecision::RetryAfter(delay) => delay.min(self.config.max_delay),
            };

            warn!(attempt, ?delay, %error, "attempt failed, retrying");

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(attempt, "cancelled during backoff");
                    return RetryOutcome { result: Err(ResilienceError::Cancelled), attempts: attempt, total_delay };
                }
                () = tokio::time::sleep(delay) => {}
            }
            total_delay += delay;
        }
    }
}

/// Pre-defined retry policies
pub mod policies {
    use super::{ErrorClassification, RetryDecision, RetryPolicy};

    /// Retries errors classified as retryable that are not cancellations
    ///
    /// A server-provided `retry_after` hint replaces the backoff delay.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct DefaultRetryPolicy;

    impl<E: ErrorClassification> RetryPolicy<E> for DefaultRetryPolicy {
        fn should_retry(&self, error: &E, _attempt: u32) -> RetryDecision {
            if !error.is_retryable() || error.is_cancellation() {
                return RetryDecision::Stop;
            }
            error.retry_after().map_or(RetryDecision::Retry, RetryDecision::RetryAfter)
        }
    }

    /// Retries on any error
    #[derive(Debug, Clone, Copy, Default)]
    pub struct AlwaysRetry;

    impl<E> RetryPolicy<E> for AlwaysRetry {
        fn should_retry(&self, _error: &E, _attempt: u32) -> RetryDecision {
            RetryDecision::Retry
        }
    }

    /// Never retries
    #[derive(Debug, Clone, Copy, Default)]
    pub struct NeverRetry;

    impl<E> RetryPolicy<E> for NeverRetry {
        fn should_retry(&self, _error: &E, _attempt: u32) -> RetryDecision {
            RetryDecision::Stop
        }
    }

    /// Predicate-based retry policy
    #[derive(Debug, Clone)]
    pub struct PredicateRetry<F> {
        predicate: F,
    }

    impl<F> PredicateRetry<F> {
        pub fn new(predicate: F) -> Self {
            Self { predicate }
        }
    }

    impl<F, E> RetryPolicy<E> for PredicateRetry<F>
    where
        F: Fn(&E, u32) -> bool + Send + Sync,
    {
        fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision {
            if (self.predicate)(error, attempt) {
                RetryDecision::Retry
            } else {
                RetryDecision::Stop
            }
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for backoff computation, retry bounds, policies and
    //! cancellation.

    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use tokio::time::Instant;

    use super::policies::{AlwaysRetry, DefaultRetryPolicy, NeverRetry, PredicateRetry};
    use super::*;
    use crate::error::RemoteError;

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig::builder()
            .max_attempts(max_attempts)
            .base_delay(Duration::from_millis(10))
            .max_delay(Duration::from_millis(100))
            .build()
            .unwrap()
    }

    /// Validates the exponential backoff schedule and its cap.
    ///
    /// Assertions:
    /// - Confirms 500ms, 1s, 2s for the default config.
    /// - Ensures delays never exceed `max_delay`.
    #[test]
    fn test_delay_for_attempt() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(2000));
        assert_eq!(config.delay_for_attempt(6), Duration::from_secs(10));
        assert_eq!(config.delay_for_attempt(200), Duration::from_secs(10));
    }

    #[test]
    fn test_config_validation() {
        assert!(RetryConfig::builder().max_attempts(0).build().is_err());
        assert!(RetryConfig::builder().multiplier(1.0).build().is_err());
        assert!(RetryConfig::builder().multiplier(f64::NAN).build().is_err());
        assert!(RetryConfig::builder()
            .base_delay(Duration::from_secs(5))
            .max_delay(Duration::from_secs(1))
            .build()
            .is_err());
        assert!(RetryConfig::default().validate().is_ok());
    }

    /// Validates the retry bound with the default schedule.
    ///
    /// Assertions:
    /// - Confirms exactly 3 attempts are made.
    /// - Confirms the delays sum to 1500ms (500ms then 1000ms).
    /// - Ensures the last failure is surfaced through `RetryExhausted`.
    #[tokio::test(start_paused = true)]
    async fn test_retry_bound_with_default_schedule() {
        let executor = RetryExecutor::from_config(RetryConfig::default()).unwrap();
        let attempts = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let started = Instant::now();

        let counter = Arc::clone(&attempts);
        let outcome = executor
            .execute_with_outcome(&cancel, move |_| {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err::<(), _>(RemoteError::network(format!("attempt {n}"))) }
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.total_delay, Duration::from_millis(1500));
        assert!(started.elapsed() >= Duration::from_millis(1500));

        match outcome.result {
            Err(ResilienceError::RetryExhausted { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert_eq!(source, RemoteError::network("attempt 3"));
            }
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_transient_failures() {
        let executor = RetryExecutor::from_config(fast_config(5)).unwrap();
        let attempts = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let counter = Arc::clone(&attempts);
        let outcome = executor
            .execute_with_outcome(&cancel, move |_| {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(RemoteError::timeout(Duration::from_secs(1)))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.total_delay, Duration::from_millis(30));
        assert_eq!(outcome.into_result().unwrap(), 3);
    }

    /// Validates non-retryable errors propagate after a single attempt.
    ///
    /// Assertions:
    /// - Confirms one attempt and `OperationFailed` carrying the original
    ///   validation error.
    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_stops_immediately() {
        let executor = RetryExecutor::from_config(fast_config(5)).unwrap();
        let attempts = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let counter = Arc::clone(&attempts);
        let result = executor
            .execute(&cancel, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(RemoteError::validation("missing title")) }
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        match result {
            Err(ResilienceError::OperationFailed { source }) => {
                assert_eq!(source, RemoteError::validation("missing title"));
            }
            other => panic!("expected OperationFailed, got {other:?}"),
        }
    }

    /// Validates cancellation during the backoff delay.
    ///
    /// Assertions:
    /// - Ensures the outcome is `Cancelled`, not `RetryExhausted`.
    /// - Confirms no further attempt is started after cancellation.
    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_delay() {
        let config = RetryConfig::builder()
            .max_attempts(5)
            .base_delay(Duration::from_secs(10))
            .max_delay(Duration::from_secs(60))
            .build()
            .unwrap();
        let executor = RetryExecutor::from_config(config).unwrap();
        let attempts = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let counter = Arc::clone(&attempts);
        let result = executor
            .execute(&cancel, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(RemoteError::network("down")) }
            })
            .await;

        assert!(matches!(result, Err(ResilienceError::Cancelled)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_already_cancelled_token_skips_operation() {
        let executor = RetryExecutor::from_config(fast_config(3)).unwrap();
        let attempts = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = executor
            .execute(&cancel, |_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, RemoteError>(()) }
            })
            .await;

        assert!(matches!(result, Err(ResilienceError::Cancelled)));
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    /// Validates the operation observes the caller's token and a
    /// cancellation-classified error is not retried.
    ///
    /// Assertions:
    /// - Confirms a `RemoteError::Cancelled` stops after one attempt.
    #[tokio::test]
    async fn test_cancellation_error_not_retried() {
        let executor = RetryExecutor::from_config(fast_config(3)).unwrap();
        let attempts = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result = executor
            .execute(&cancel, |token| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    assert!(!token.is_cancelled());
                    Err::<(), _>(RemoteError::Cancelled)
                }
            })
            .await;

        assert!(matches!(result, Err(ResilienceError::OperationFailed { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_and_never_policies() {
        let cancel = CancellationToken::new();

        let always = RetryExecutor::new(fast_config(4), AlwaysRetry).unwrap();
        let outcome = always
            .execute_with_outcome(&cancel, |_| async {
                Err::<(), _>(RemoteError::validation("still retried"))
            })
            .await;
        assert_eq!(outcome.attempts, 4);
        assert!(matches!(outcome.result, Err(ResilienceError::RetryExhausted { attempts: 4, .. })));

        let never = RetryExecutor::new(fast_config(4), NeverRetry).unwrap();
        let outcome = never
            .execute_with_outcome(&cancel, |_| async {
                Err::<(), _>(RemoteError::network("not retried"))
            })
            .await;
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_predicate_policy_sees_attempt_number() {
        let cancel = CancellationToken::new();
        let policy = PredicateRetry::new(|_: &RemoteError, attempt: u32| attempt < 2);
        let executor = RetryExecutor::new(fast_config(5), policy).unwrap();

        let outcome = executor
            .execute_with_outcome(&cancel, |_| async { Err::<(), _>(RemoteError::network("x")) })
            .await;

        assert_eq!(outcome.attempts, 2);
        assert!(matches!(outcome.result, Err(ResilienceError::OperationFailed { .. })));
    }

    struct FixedDelay(Duration);

    impl RetryPolicy<RemoteError> for FixedDelay {
        fn should_retry(&self, _error: &RemoteError, _attempt: u32) -> RetryDecision {
            RetryDecision::RetryAfter(self.0)
        }
    }

    /// Validates custom delays are capped at `max_delay`.
    ///
    /// Assertions:
    /// - Confirms a 1h `RetryAfter` contributes only 100ms per retry.
    #[tokio::test(start_paused = true)]
    async fn test_retry_after_is_capped() {
        let cancel = CancellationToken::new();
        let executor =
            RetryExecutor::new(fast_config(3), FixedDelay(Duration::from_secs(3600))).unwrap();

        let outcome = executor
            .execute_with_outcome(&cancel, |_| async { Err::<(), _>(RemoteError::network("x")) })
            .await;

        assert_eq!(outcome.total_delay, Duration::from_millis(200));
    }

    #[test]
    fn test_default_policy_classification() {
        let policy = DefaultRetryPolicy;
        assert_eq!(policy.should_retry(&RemoteError::network("x"), 1), RetryDecision::Retry);
        assert_eq!(
            policy.should_retry(&RemoteError::invalid_argument("id", "empty"), 1),
            RetryDecision::Stop
        );
        assert_eq!(policy.should_retry(&RemoteError::Cancelled, 1), RetryDecision::Stop);
        assert_eq!(
            policy.should_retry(&RemoteError::Throttled { retry_after: None }, 1),
            RetryDecision::Retry
        );
        assert_eq!(
            policy.should_retry(
                &RemoteError::Throttled { retry_after: Some(Duration::from_secs(5)) },
                1
            ),
            RetryDecision::RetryAfter(Duration::from_secs(5))
        );

        let limited = crate::resilience::RateLimitExceeded {
            identifier: "tenant-a".to_string(),
            limit: 5,
            window: Duration::from_secs(1),
            retry_after: Some(Duration::from_millis(400)),
        };
        assert_eq!(
            policy.should_retry(&limited, 1),
            RetryDecision::RetryAfter(Duration::from_millis(400))
        );
    }

    /// Validates that the default policy waits as long as the remote asks.
    ///
    /// Assertions:
    /// - Confirms a throttled response with a 5s hint delays the retry by 5s
    ///   instead of the 10ms base delay.
    /// - Confirms the hint is still capped at `max_delay`.
    #[tokio::test(start_paused = true)]
    async fn test_default_policy_honors_retry_after() {
        let cancel = CancellationToken::new();
        let config = RetryConfig::builder()
            .max_attempts(2)
            .base_delay(Duration::from_millis(10))
            .max_delay(Duration::from_secs(30))
            .build()
            .unwrap();
        let executor = RetryExecutor::from_config(config).unwrap();
        let throttled = || RemoteError::Throttled { retry_after: Some(Duration::from_secs(5)) };

        let outcome = executor
            .execute_with_outcome(&cancel, |_| async move { Err::<(), _>(throttled()) })
            .await;
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.total_delay, Duration::from_secs(5));

        let capped = RetryExecutor::from_config(fast_config(2)).unwrap();
        let outcome = capped
            .execute_with_outcome(&cancel, |_| async move { Err::<(), _>(throttled()) })
            .await;
        assert_eq!(outcome.total_delay, Duration::from_millis(100));
    }
}
