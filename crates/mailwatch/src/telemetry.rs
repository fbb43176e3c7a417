//! Tracing subscriber setup.
//!
//! Library code logs through both `tracing` and `log`; `log` records are
//! bridged into the tracing subscriber.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter, checked before `RUST_LOG`.
pub const LOG_ENV_VAR: &str = "MAILWATCH_LOG";

pub type InitError = Box<dyn std::error::Error + Send + Sync>;

/// Resolves the filter from `MAILWATCH_LOG`, then `RUST_LOG`, then
/// `default_filter`.
pub fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Installs a human-readable subscriber.
///
/// Fails when a global subscriber or logger is already installed; callers
/// that may initialise twice can ignore the error.
pub fn init_tracing(default_filter: &str) -> Result<(), InitError> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_filter))
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;
    Ok(())
}

/// Installs a subscriber that writes one JSON object per event.
pub fn init_json_tracing(default_filter: &str) -> Result<(), InitError> {
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter(default_filter))
        .with_current_span(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;
    Ok(())
}
