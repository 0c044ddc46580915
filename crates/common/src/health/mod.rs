//! Health check registry and built-in component checks
//!
//! [`HealthCheckRegistry`] aggregates named async checks. Overall health is
//! healthy only when every registered check is healthy. Check errors and
//! panics are captured into the failing [`HealthStatus`] instead of
//! propagating, and healthy/unhealthy transitions are broadcast to
//! subscribers.

pub mod component_checks;
pub mod registry;
pub mod status;

pub use component_checks::{CacheCheck, CircuitBreakerCheck, MemoryPressureCheck, RateLimiterCheck};
pub use registry::{
    BoxError, FnHealthCheck, HealthChangeEvent, HealthCheck, HealthCheckError, HealthCheckRegistry,
    HealthRegistryConfig, HealthRegistryConfigBuilder,
};
pub use status::{CheckReport, HealthReport, HealthStatus, SharedError};
