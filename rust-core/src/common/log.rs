//! Logging setup for the pipeline binary and tests.
//!
//! Installs a global `tracing` subscriber. `RUST_LOG` takes precedence over
//! the level from `[logging]` in the configuration document.

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global fmt subscriber. Subsequent calls are no-ops.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
