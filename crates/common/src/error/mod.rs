//! Shared error types and classification for the tollgate core
//!
//! Every failure that crosses a component boundary is classified through the
//! [`ErrorClassification`] trait so retry decisions, health reporting and log
//! severity agree on what a given error means.
//!
//! # Error Handling Architecture
//!
//! | Type | Produced by | Meaning |
//! |------|-------------|---------|
//! | [`RemoteError`] | remote API clients | Ready-made error for remote calls |
//! | [`ConfigError`] | config builders and loaders | Invalid or unreadable configuration |
//! | [`crate::resilience::ResilienceError`] | breaker, retry, executor, cache | Outcome of a guarded call |
//! | [`crate::resilience::RateLimitExceeded`] | rate limiter | Admission rejected |
//! | [`crate::lifecycle::LifecycleError`] | background tasks | Start/stop failures |
//! | [`crate::health::HealthCheckError`] | health registry | Check panic, timeout or cancellation captured as data |
//!
//! ## Retryability
//!
//! The default retry policy ([`crate::resilience::policies::DefaultRetryPolicy`])
//! retries an error iff `is_retryable()` is true and `is_cancellation()` is
//! false. Network and timeout failures are retryable; argument, validation and
//! cancellation failures are not.
//!
//! ```rust
//! use tollgate_common::error::{ErrorClassification, RemoteError};
//!
//! let err = RemoteError::from_status(503, "maintenance");
//! assert!(err.is_retryable());
//!
//! let err = RemoteError::validation("project id must not be empty");
//! assert!(!err.is_retryable());
//! ```

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Unified severity level for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Expected conditions (not found, empty results)
    Info,
    /// Degraded but operational (throttling, transient failures)
    Warning,
    /// Failure requiring attention
    Error,
    /// System integrity at risk
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Standard interface for classifying errors by their characteristics
pub trait ErrorClassification {
    /// Whether repeating the same operation may succeed
    fn is_retryable(&self) -> bool;

    /// Whether the error represents caller-initiated cancellation
    fn is_cancellation(&self) -> bool {
        false
    }

    /// Severity used for logging and health reporting
    fn severity(&self) -> ErrorSeverity;

    /// Suggested delay before trying again, when the source provides one
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Error type for calls against the remote API
///
/// Remote clients are free to use their own error types as long as they
/// implement [`ErrorClassification`]; this enum covers the common HTTP cases.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Connection refused, reset, DNS failure and friends
    #[error("network error: {message}")]
    Network { message: String },

    /// The request did not complete in time
    #[error("request timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// The remote answered with a server-side failure (5xx)
    #[error("remote service unavailable (status {status}): {message}")]
    Unavailable { status: u16, message: String },

    /// The remote throttled us (429)
    #[error("throttled by remote service")]
    Throttled { retry_after: Option<Duration> },

    /// A caller-supplied argument was rejected before or by the remote
    #[error("invalid argument `{name}`: {message}")]
    InvalidArgument { name: String, message: String },

    /// The request payload failed validation (400/422)
    #[error("validation failed: {message}")]
    Validation { message: String },

    /// The requested resource does not exist (404)
    #[error("remote resource not found: {resource}")]
    NotFound { resource: String },

    /// The caller cancelled the request
    #[error("request cancelled")]
    Cancelled,
}

impl RemoteError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    pub fn timeout(timeout: Duration) -> Self {
        Self::Timeout { timeout }
    }

    pub fn invalid_argument(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument { name: name.into(), message: message.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound { resource: resource.into() }
    }

    /// Map an HTTP status code from the remote into an error variant
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            404 => Self::NotFound { resource: message },
            408 | 504 => Self::Timeout { timeout: Duration::ZERO },
            429 => Self::Throttled { retry_after: None },
            400..=499 => Self::Validation { message },
            _ => Self::Unavailable { status, message },
        }
    }
}

impl ErrorClassification for RemoteError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network { .. }
                | Self::Timeout { .. }
                | Self::Unavailable { .. }
                | Self::Throttled { .. }
        )
    }

    fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::NotFound { .. } | Self::Cancelled => ErrorSeverity::Info,
            Self::Throttled { .. } | Self::Timeout { .. } | Self::Network { .. } => {
                ErrorSeverity::Warning
            }
            Self::Unavailable { .. } | Self::InvalidArgument { .. } | Self::Validation { .. } => {
                ErrorSeverity::Error
            }
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Throttled { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl ErrorClassification for std::io::Error {
    fn is_retryable(&self) -> bool {
        use std::io::ErrorKind;
        matches!(
            self.kind(),
            ErrorKind::ConnectionRefused
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::NotConnected
                | ErrorKind::BrokenPipe
                | ErrorKind::TimedOut
                | ErrorKind::Interrupted
                | ErrorKind::WouldBlock
                | ErrorKind::UnexpectedEof
        )
    }

    fn severity(&self) -> ErrorSeverity {
        if self.is_retryable() {
            ErrorSeverity::Warning
        } else {
            ErrorSeverity::Error
        }
    }
}

/// Configuration validation and loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration for `{field}`: {message}")]
    Invalid { field: &'static str, message: String },

    #[error("failed to parse configuration: {message}")]
    Parse { message: String },

    #[error("failed to read configuration file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid { field, message: message.into() }
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    //! Unit tests for error classification.
    use super::*;

    /// Validates `RemoteError::from_status` mapping of HTTP status codes.
    ///
    /// Assertions:
    /// - Confirms 404 maps to `NotFound`, 429 to `Throttled`, 503 to
    ///   `Unavailable` and 422 to `Validation`.
    #[test]
    fn test_remote_error_from_status() {
        assert!(matches!(RemoteError::from_status(404, "projects/7"), RemoteError::NotFound { .. }));
        assert!(matches!(RemoteError::from_status(429, ""), RemoteError::Throttled { .. }));
        assert!(matches!(
            RemoteError::from_status(503, "down"),
            RemoteError::Unavailable { status: 503, .. }
        ));
        assert!(matches!(RemoteError::from_status(422, "bad"), RemoteError::Validation { .. }));
        assert!(matches!(RemoteError::from_status(504, "slow"), RemoteError::Timeout { .. }));
    }

    /// Validates retryability of the remote error variants.
    ///
    /// Assertions:
    /// - Network, timeout, unavailable and throttled errors are retryable.
    /// - Validation, argument, not-found and cancelled errors are not.
    #[test]
    fn test_remote_error_retryability() {
        assert!(RemoteError::network("reset").is_retryable());
        assert!(RemoteError::timeout(Duration::from_secs(5)).is_retryable());
        assert!(RemoteError::from_status(502, "bad gateway").is_retryable());
        assert!(RemoteError::Throttled { retry_after: None }.is_retryable());

        assert!(!RemoteError::validation("missing field").is_retryable());
        assert!(!RemoteError::invalid_argument("id", "empty").is_retryable());
        assert!(!RemoteError::not_found("x").is_retryable());
        assert!(!RemoteError::Cancelled.is_retryable());
        assert!(RemoteError::Cancelled.is_cancellation());
    }

    /// Validates `retry_after` propagation for throttled responses.
    ///
    /// Assertions:
    /// - Confirms the throttled hint is surfaced and other variants have none.
    #[test]
    fn test_remote_error_retry_after() {
        let err = RemoteError::Throttled { retry_after: Some(Duration::from_secs(3)) };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
        assert_eq!(RemoteError::network("x").retry_after(), None);
    }

    #[test]
    fn test_io_error_classification() {
        let transient = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let permanent = std::io::Error::new(std::io::ErrorKind::InvalidInput, "bad input");
        assert!(transient.is_retryable());
        assert_eq!(transient.severity(), ErrorSeverity::Warning);
        assert!(!permanent.is_retryable());
        assert_eq!(permanent.severity(), ErrorSeverity::Error);
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::invalid("failure_threshold", "must be greater than 0");
        assert_eq!(
            err.to_string(),
            "invalid configuration for `failure_threshold`: must be greater than 0"
        );
    }
}
