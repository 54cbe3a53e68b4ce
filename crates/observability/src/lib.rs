//! Process-wide logging setup shared by queue consumers and tools.

/// Initialize process-wide logging.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Subscriber configuration (format, filters).
pub mod tracing;

pub use self::tracing::{LOG_FORMAT_ENV, LogFormat, ParseLogFormatError, init_with};
