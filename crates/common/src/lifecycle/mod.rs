//! Lifecycle utilities for background work
//!
//! - **[`task`]**: cancellable periodic tasks with explicit, time-bounded stop

pub mod task;

pub use task::{BackgroundTask, LifecycleError, LifecycleResult, TaskSlot, DEFAULT_JOIN_TIMEOUT};
