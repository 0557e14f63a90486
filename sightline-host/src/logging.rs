//! Tracing subscriber setup for hosts that don't install their own.

use sightline_core::config::GeneralConfig;
use sightline_core::{Result, SightlineError};
use tracing_subscriber::EnvFilter;

/// Build the level filter: `RUST_LOG` if set, otherwise `level`.
///
/// # Errors
/// Returns `SightlineError::Config` if neither parses as a filter.
pub fn env_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| SightlineError::Config(format!("general.log_level: {e}")))
}

/// Install the global `fmt` subscriber, as text or JSON lines.
///
/// # Errors
/// Returns `SightlineError::Config` if the filter is invalid or a global
/// subscriber is already installed.
pub fn init(general: &GeneralConfig) -> Result<()> {
    let filter = env_filter(&general.log_level)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if general.json_logs {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| SightlineError::Config(format!("tracing subscriber: {e}")))?;

    tracing::info!(level = %general.log_level, json = general.json_logs, "Logging initialised");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_accepts_levels_and_directives() {
        assert!(env_filter("debug").is_ok());
        assert!(env_filter("sightline_core=trace,info").is_ok());
    }

    #[test]
    fn second_init_fails() {
        let general = GeneralConfig::default();
        let _ = init(&general);
        assert!(init(&general).is_err());
    }
}
