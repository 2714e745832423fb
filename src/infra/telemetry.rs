//! Tracing initialisation with a `RUST_LOG` env filter.

use tracing_subscriber::EnvFilter;

/// Initialise the global tracing subscriber. Safe to call more than once;
/// later calls are no-ops (only the first subscriber wins).
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}
