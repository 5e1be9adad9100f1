//! Process-wide tracing/logging setup.

use gatehouse_core::Environment;

/// Tracing configuration (filters, formatting).
pub mod tracing;

/// Initialize tracing/logging from the loaded environment.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init(env: &Environment) {
    tracing::init_with(env.log_format, &env.log_level);
}
