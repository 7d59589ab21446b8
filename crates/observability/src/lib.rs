//! Tracing/logging setup shared by the stocktrack binaries.

/// Tracing configuration (filters, formatting).
pub mod tracing;

pub use self::tracing::LogFormat;

/// Initialize process-wide tracing with the given output format.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init(format: LogFormat) {
    tracing::init(format);
}
