//! Test doubles and async helpers for code built on this crate
//!
//! - **[`async_utils`]**: timeouts and polling that cooperate with paused
//!   tokio time
//! - **[`mocks`]**: [`MockRemote`], a scripted remote call that records how
//!   often it was invoked
//! - **[`logging`]**: [`init_test_tracing`], `RUST_LOG`-filtered output for
//!   test runs
//!
//! ```rust
//! use tollgate_common::error::RemoteError;
//! use tollgate_common::testing::MockRemote;
//!
//! # tokio_test::block_on(async {
//! let remote = MockRemote::new();
//! remote.push_err(RemoteError::network("reset"));
//! remote.push_ok(7_u32);
//!
//! assert!(remote.call().await.is_err());
//! assert_eq!(remote.call().await, Ok(7));
//! assert_eq!(remote.calls(), 2);
//! # });
//! ```

pub mod async_utils;
pub mod logging;
pub mod mocks;

pub use async_utils::{poll_until, timeout_ok};
pub use logging::init_test_tracing;
pub use mocks::MockRemote;

pub use crate::resilience::{Clock, MockClock, SystemClock};
