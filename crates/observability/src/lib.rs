//! Process-wide logging setup for embedders of the stock engine.

/// Tracing subscriber configuration (filters, output format).
pub mod tracing;

pub use crate::tracing::{LogConfig, LogFormat};

/// Initialize logging from the environment (`RUST_LOG`, `STOCK_LOG_FORMAT`).
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    let _ = crate::tracing::try_init(&LogConfig::from_env());
}
