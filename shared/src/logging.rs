//! Shared logging utilities for consistent tracing across harness binaries and tests

use tracing_subscriber::{EnvFilter, fmt};

/// Build the filter used by the harness.
///
/// `RUST_LOG` wins when set; otherwise the harness crates log at `level` and
/// the HTTP stack stays at `warn`.
pub fn harness_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("harness={level},shared={level},reqwest=warn,hyper=warn"))
    })
}

/// Initialize the fmt subscriber.
///
/// Safe to call from every test: only the first call installs a subscriber.
pub fn init_tracing(level: &str) {
    let _ = fmt()
        .with_env_filter(harness_filter(level))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_test_writer()
        .try_init();
}
