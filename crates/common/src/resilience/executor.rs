//! Circuit breaker and retry composed into one call-site API
//!
//! The breaker wraps the whole retry sequence: a call is admitted once, its
//! attempts run under the retry policy, and the sequence's final outcome is
//! recorded as a single breaker success or failure. Before every retry the
//! breaker is consulted again, so once it opens (because of this or any
//! other caller) the loop stops after the attempt in flight instead of
//! continuing to hit a failing dependency.
//!
//! ```rust,no_run
//! use tokio_util::sync::CancellationToken;
//! use tollgate_common::error::RemoteError;
//! use tollgate_common::resilience::{CircuitBreakerConfig, ResilientExecutor, RetryConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let executor = ResilientExecutor::new(
//!     "projects-api",
//!     CircuitBreakerConfig::default(),
//!     RetryConfig::default(),
//! )?;
//!
//! let cancel = CancellationToken::new();
//! let projects = executor
//!     .execute("list_projects", &cancel, |_token| async {
//!         Ok::<_, RemoteError>(vec!["alpha".to_string()])
//!     })
//!     .await?;
//! assert_eq!(projects.len(), 1);
//! # Ok(())
//! # }
//! ```

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use super::clock::{Clock, SystemClock};
use super::error::ResilienceResult;
use super::retry::{policies::DefaultRetryPolicy, RetryConfig, RetryExecutor, RetryPolicy};
use crate::error::ConfigResult;

/// Breaker-guarded retrying executor for one remote dependency
#[derive(Debug, Clone)]
pub struct ResilientExecutor<P = DefaultRetryPolicy, C: Clock = SystemClock> {
    breaker: CircuitBreaker<C>,
    retry: RetryExecutor<P>,
}

impl ResilientExecutor<DefaultRetryPolicy, SystemClock> {
    pub fn new(
        dependency: impl Into<String>,
        breaker: CircuitBreakerConfig,
        retry: RetryConfig,
    ) -> ConfigResult<Self> {
        Ok(Self {
            breaker: CircuitBreaker::new(dependency, breaker)?,
            retry: RetryExecutor::from_config(retry)?,
        })
    }
}

impl<P, C: Clock> ResilientExecutor<P, C> {
    /// Compose an existing breaker (possibly shared) with a retry executor
    pub fn from_parts(breaker: CircuitBreaker<C>, retry: RetryExecutor<P>) -> Self {
        Self { breaker, retry }
    }

    pub fn breaker(&self) -> &CircuitBreaker<C> {
        &self.breaker
    }

    pub fn retry(&self) -> &RetryExecutor<P> {
        &self.retry
    }

    pub fn state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Run `operation` through the breaker and the retry policy
    ///
    /// `operation_name` only labels diagnostics.
    #[instrument(
        skip_all,
        fields(dependency = %self.breaker.name(), operation = operation_name)
    )]
    pub async fn execute<F, Fut, T, E>(
        &self,
        operation_name: &str,
        cancel: &CancellationToken,
        operation: F,
    ) -> ResilienceResult<T, E>
    where
        P: RetryPolicy<E>,
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let breaker = &self.breaker;
        let gate = || match breaker.state() {
            CircuitState::Open => Err(CircuitState::Open),
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
        };

        let result = breaker
            .execute_guarded(|| async move {
                let outcome = self.retry.run(cancel, gate, operation).await;
                if outcome.attempts > 1 {
                    debug!(
                        attempts = outcome.attempts,
                        total_delay = ?outcome.total_delay,
                        "retry sequence finished"
                    );
                }
                outcome.into_result()
            })
            .await;

        if let Err(error) = &result {
            if !error.is_cancelled() {
                warn!(%error, state = %breaker.state(), "guarded call failed");
            }
        }
        result
    }
}
