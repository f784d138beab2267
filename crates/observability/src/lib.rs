//! Shared tracing/logging setup for modelforge processes.

/// Initialize process-wide tracing with the format chosen by `LOG_FORMAT`.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(tracing::LogFormat::from_env());
}

/// Tracing configuration (filters, formats).
pub mod tracing;

pub use tracing::LogFormat;
