use tracing_subscriber::EnvFilter;

use crate::terminal::CrLf;

/// Logs go to stderr; stdout carries the scan table.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(|| CrLf::new(std::io::stderr()))
        .with_target(false)
        .try_init();

    tracing::debug!(level, "logging initialized");
}
