//! Process memory pressure detection
//!
//! [`MemoryPressureMonitor`] samples memory off the hot path and publishes a
//! [`MemoryPressureState`] over a `tokio::sync::watch` channel. The adaptive
//! cache subscribes to shorten TTLs of new entries while pressure is high.

pub mod monitor;
pub mod sampler;

pub use monitor::{
    MemoryMonitorConfig, MemoryMonitorConfigBuilder, MemoryPressureMonitor, MemoryPressureState,
};
pub use sampler::{FixedMemorySampler, MemorySampler, ProcessMemorySampler};
