//! Telemetry helpers for structured logging.

use tracing_subscriber::EnvFilter;

/// Install a default env-filtered `tracing` subscriber if none is set yet.
///
/// Embedding applications normally install their own subscriber; this
/// helper exists for tests and quick diagnostics (`RUST_LOG=trace` shows
/// every park/handoff decision the limiters make). Safe to call more than
/// once.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
