//! Tracing setup for applications embedding weft.
//!
//! The library itself only emits `tracing` events and spans; installing a
//! subscriber is left to the application. This helper covers the common case.

use tracing_subscriber::EnvFilter;

use crate::config::{GeneralConfig, LogFormat};

/// The filter to use: `RUST_LOG` when set and valid, else the configured
/// level, else `info`.
#[must_use]
pub fn env_filter(config: &GeneralConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install a global fmt subscriber in the configured format.
///
/// Returns `false` when a subscriber was already installed, in which case
/// nothing changes.
pub fn init_tracing(config: &GeneralConfig) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .with_target(true);

    match config.log_format {
        LogFormat::Text => builder.try_init().is_ok(),
        LogFormat::Json => builder.json().try_init().is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_level_falls_back() {
        let config = GeneralConfig {
            log_level: "not a level[".into(),
            ..GeneralConfig::default()
        };
        // Only meaningful when RUST_LOG is unset; either way it must not panic.
        let _filter = env_filter(&config);
    }

    #[test]
    fn second_init_is_harmless() {
        let config = GeneralConfig::default();
        let _first = init_tracing(&config);
        assert!(!init_tracing(&config));
    }
}
