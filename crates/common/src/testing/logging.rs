//! Log output for tests

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Install a `fmt` subscriber filtered by `RUST_LOG` (default `warn`)
///
/// Only the first call in a process installs anything. Output goes through
/// libtest's capture, so it is shown for failing tests only.
pub fn init_test_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        // Another subscriber may already be installed by the host test binary.
        let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
    });
}
