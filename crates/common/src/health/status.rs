//! Health check results and the serializable report built from them

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Error captured from a failing or panicking check
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

/// Result of one health check
///
/// # Example
/// ```rust
/// use tollgate_common::health::HealthStatus;
///
/// let status = HealthStatus::healthy()
///     .with_description("connected")
///     .with_data("active_windows", 3);
/// assert!(status.is_healthy);
/// assert_eq!(status.data["active_windows"], 3);
/// ```
#[derive(Clone)]
pub struct HealthStatus {
    pub is_healthy: bool,
    pub description: Option<String>,
    /// Structured details reported by the check
    pub data: BTreeMap<String, serde_json::Value>,
    /// Wall time the check took; filled in by the registry
    pub response_time: Option<Duration>,
    pub error: Option<SharedError>,
    pub checked_at: SystemTime,
}

impl HealthStatus {
    pub fn healthy() -> Self {
        Self {
            is_healthy: true,
            description: None,
            data: BTreeMap::new(),
            response_time: None,
            error: None,
            checked_at: SystemTime::now(),
        }
    }

    pub fn unhealthy(description: impl Into<String>) -> Self {
        Self { is_healthy: false, description: Some(description.into()), ..Self::healthy() }
    }

    /// Unhealthy status carrying the error that caused it
    pub fn from_error<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::from_shared_error(Arc::new(error))
    }

    pub fn from_shared_error(error: SharedError) -> Self {
        Self {
            is_healthy: false,
            description: Some(error.to_string()),
            error: Some(error),
            ..Self::healthy()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Attach a data point; values that fail to serialize are stored as null
    pub fn with_data(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        self.data.insert(key.into(), serde_json::to_value(value).unwrap_or_default());
        self
    }

    pub fn with_response_time(mut self, elapsed: Duration) -> Self {
        self.response_time = Some(elapsed);
        self
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::healthy()
    }
}

impl fmt::Debug for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthStatus")
            .field("is_healthy", &self.is_healthy)
            .field("description", &self.description)
            .field("data", &self.data)
            .field("response_time", &self.response_time)
            .field("error", &self.error.as_ref().map(ToString::to_string))
            .finish()
    }
}

/// Serializable view of a single check
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub name: String,
    pub is_healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub checked_at_ms: u64,
}

impl CheckReport {
    pub fn from_status(name: impl Into<String>, status: &HealthStatus) -> Self {
        Self {
            name: name.into(),
            is_healthy: status.is_healthy,
            description: status.description.clone(),
            data: status.data.clone(),
            response_time_ms: status.response_time.map(duration_to_millis),
            error: status.error.as_ref().map(ToString::to_string),
            checked_at_ms: unix_millis(status.checked_at),
        }
    }
}

/// Aggregate result of every registered check, ready for a readiness endpoint
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub is_healthy: bool,
    pub description: String,
    pub failing: usize,
    pub total: usize,
    pub checks: Vec<CheckReport>,
}

impl HealthReport {
    /// Build a report from per-check results, sorted by check name
    pub fn from_results(results: &BTreeMap<String, HealthStatus>) -> Self {
        let checks: Vec<CheckReport> = results
            .iter()
            .map(|(name, status)| CheckReport::from_status(name.clone(), status))
            .collect();
        let total = checks.len();
        let failing = checks.iter().filter(|check| !check.is_healthy).count();
        Self {
            is_healthy: failing == 0,
            description: overall_description(failing, total),
            failing,
            total,
            checks,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

pub(crate) fn overall_description(failing: usize, total: usize) -> String {
    if failing == 0 {
        format!("all {total} health checks passing")
    } else {
        format!("{failing} of {total} health checks failing")
    }
}

fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn unix_millis(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH).map(duration_to_millis).unwrap_or(0)
}
