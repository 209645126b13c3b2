//! Tracing/logging setup shared by every process embedding the ledger.

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use tracing::{LogFormat, ObservabilityConfig};

/// Initialize process-wide tracing with `config`.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init(config: &ObservabilityConfig) {
    tracing::init(config);
}
