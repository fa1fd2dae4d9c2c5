//! Test setup helpers.

/// Install a test-writer subscriber once; later calls are no-ops.
///
/// Level comes from `RUST_LOG`, defaulting to `warn`.
pub fn tracing_setup() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
