use std::env;

use tracing_subscriber::EnvFilter;

/// Environment variable consulted after `RUST_LOG`.
pub const LOG_ENV: &str = "FCMPUSH_LOG";

/// Initialize tracing/logging for the application.
///
/// The filter comes from `RUST_LOG`, then `FCMPUSH_LOG`, then `default_level`.
pub fn init(default_level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_env_filter(filter_from_env(default_level))
        .try_init();
}

fn filter_from_env(default_level: &str) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    if let Some(value) = env::var(LOG_ENV).ok().filter(|v| !v.trim().is_empty())
        && let Ok(filter) = EnvFilter::try_new(value)
    {
        return filter;
    }

    EnvFilter::try_new(default_level.to_lowercase()).unwrap_or_else(|_| EnvFilter::new("info"))
}
