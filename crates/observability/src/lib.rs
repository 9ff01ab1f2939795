//! Process-wide tracing setup shared by the webhook API and the worker.

/// Initialize process-wide structured logging.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(tracing::LogFormat::from_env());
}

/// Filter and formatter wiring.
pub mod tracing;
