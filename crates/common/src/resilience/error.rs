//! Outcome taxonomy for guarded calls

use std::time::Duration;

use thiserror::Error;

use super::circuit_breaker::CircuitState;
use super::rate_limiter::RateLimitExceeded;
use crate::error::{ErrorClassification, ErrorSeverity};

/// Errors surfaced by the breaker, retry policy, executor and cache factory
/// path
///
/// Generic over the wrapped operation's error type `E` so the original
/// failure is always preserved. A caller sees either a breaker rejection, a
/// cancellation, a rate-limit rejection, or the original failure (wrapped in
/// `RetryExhausted` when every attempt failed).
#[derive(Debug, Error)]
pub enum ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The breaker rejected the call without invoking the operation
    #[error("circuit breaker is {state}, rejecting call")]
    CircuitOpen { state: CircuitState },

    /// Every attempt failed; carries the last failure
    #[error("all {attempts} attempts failed")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: E,
    },

    /// Admission was refused by a rate limiter
    #[error(transparent)]
    RateLimited(#[from] RateLimitExceeded),

    /// The caller's cancellation token fired
    #[error("operation cancelled")]
    Cancelled,

    /// The operation failed with an error the retry policy declined to retry
    #[error("operation failed")]
    OperationFailed {
        #[source]
        source: E,
    },
}

/// Result type for guarded calls
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;

impl<E> ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Wrap an operation failure
    pub fn operation(source: E) -> Self {
        Self::OperationFailed { source }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }

    /// The underlying operation error, if this outcome carries one
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            Self::RetryExhausted { source, .. } | Self::OperationFailed { source } => Some(source),
            _ => None,
        }
    }

    /// Consume the outcome and return the underlying operation error
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::RetryExhausted { source, .. } | Self::OperationFailed { source } => Some(source),
            _ => None,
        }
    }
}

impl<E> ErrorClassification for ResilienceError<E>
where
    E: std::error::Error + ErrorClassification + Send + Sync + 'static,
{
    fn is_retryable(&self) -> bool {
        match self {
            Self::CircuitOpen { .. } | Self::RateLimited(_) => true,
            Self::RetryExhausted { .. } | Self::Cancelled => false,
            Self::OperationFailed { source } => source.is_retryable(),
        }
    }

    fn is_cancellation(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::OperationFailed { source } => source.is_cancellation(),
            _ => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::CircuitOpen { .. } | Self::RateLimited(_) => ErrorSeverity::Warning,
            Self::Cancelled => ErrorSeverity::Info,
            Self::RetryExhausted { .. } => ErrorSeverity::Error,
            Self::OperationFailed { source } => source.severity(),
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited(err) => err.retry_after,
            Self::OperationFailed { source } | Self::RetryExhausted { source, .. } => {
                source.retry_after()
            }
            _ => None,
        }
    }
}
