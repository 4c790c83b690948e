//! Telemetry helpers for structured logging and tracing.

/// Initialize tracing for embedders that have not installed their own
/// subscriber; a no-op when a dispatcher is already set. Filtering
/// follows `RUST_LOG`.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
