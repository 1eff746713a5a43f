//! Tracing/logging setup shared by the worker binary and embedding hosts.

pub mod logging;

pub use logging::LogFormat;

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    logging::init(LogFormat::from_env());
}
