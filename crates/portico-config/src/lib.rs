//! Portico configuration system.
//!
//! TOML-based configuration for the sync and presence subsystem. All
//! sections use sensible defaults so partial configs work out of the box.

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::PorticoConfig;

use portico_common::ConfigError;

/// Convenience function to load config from the platform default path.
///
/// Loads `config.toml` from the OS config directory, creates a default
/// if none exists, and validates the result.
pub fn load_config() -> Result<PorticoConfig, ConfigError> {
    let config = loader::load_default()?;
    validation::validate(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_passes_validation() {
        let config = PorticoConfig::default();
        assert!(validation::validate(&config).is_ok());
    }

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = PorticoConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: PorticoConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.realtime.heartbeat_interval_secs, 25);
        assert_eq!(parsed.presence.retrack_interval_secs, 60);
        assert!(parsed.presence.enabled);
    }
}
