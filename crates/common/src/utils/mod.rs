//! Shared helpers
//!
//! - **[`serde`]**: serde adapters for durations in configuration and reports

pub mod serde;

pub use self::serde::{duration_millis, option_duration_millis};
