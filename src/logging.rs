//! Diagnostic logging for embedders that do not install their own subscriber.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directive, e.g. `parlor=debug`.
pub const LOG_ENV: &str = "PARLOR_LOG";

const DEFAULT_FILTER: &str = "warn";

/// Install a stderr subscriber filtered by `PARLOR_LOG`.
///
/// Returns `false` when a global subscriber was already set; calling this
/// more than once is harmless.
pub fn init() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter_from(std::env::var(LOG_ENV).ok().as_deref()))
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .is_ok()
}

fn filter_from(directive: Option<&str>) -> EnvFilter {
    directive
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}
