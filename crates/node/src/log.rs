//! Installs the process-wide `tracing` subscriber, mirroring the teacher's
//! `log::setup_logging` entry point: a single call at the top of `main`
//! that wires a human-readable formatter driven by a configurable level
//! string, rather than per-module `env_logger` initialization.

use tracing_subscriber::EnvFilter;

/// Installs a `fmt` subscriber filtered by `level` (one of tracing's level
/// names, e.g. `"debug"`), falling back to the `RUST_LOG` environment
/// variable when it is set so operators can override without editing the
/// config file.
pub fn setup_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
