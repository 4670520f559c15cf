//! TOML config loading: read from path or platform default.

use std::path::{Path, PathBuf};

use portico_common::ConfigError;
use tracing::{info, warn};

use crate::schema::PorticoConfig;
use crate::validation;

/// Default config file contents written on first run.
fn default_config_toml() -> String {
    r#"# Portico sync subsystem configuration.
# Missing sections and keys fall back to built-in defaults.

[realtime]
# WebSocket endpoint of the realtime server.
url = ""
api_key = ""
heartbeat_interval_secs = 25
reconnect_delay_secs = 1
max_reconnect_delay_secs = 30

[api]
# REST endpoint for bulk reads and mutations.
base_url = ""
api_key = ""

[presence]
enabled = true
room = "portal"
retrack_interval_secs = 60

[logging]
level = "info"
"#
    .to_string()
}

/// Get the platform-specific default config file path.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::ParseError("could not determine config directory".into()))?;
    Ok(config_dir.join("portico").join("config.toml"))
}

/// Create a default TOML config file with documentation comments.
pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            ConfigError::ParseError(format!(
                "failed to create config directory {}: {e}",
                parent.display()
            ))
        })?;
    }

    std::fs::write(path, default_config_toml()).map_err(|e| {
        ConfigError::ParseError(format!(
            "failed to write default config to {}: {e}",
            path.display()
        ))
    })?;

    info!("created default config at {}", path.display());
    Ok(())
}

/// Load config from a specific TOML file path.
///
/// Deserializes the file using serde defaults for any missing fields.
/// After loading, the config is validated; if validation fails, a warning
/// is logged and the parsed config is returned as-is.
pub fn load_from_path(path: &Path) -> Result<PorticoConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ConfigError::FileNotFound(path.to_path_buf()),
        _ => ConfigError::ParseError(format!("failed to read {}: {e}", path.display())),
    })?;

    let config: PorticoConfig = toml::from_str(&content)
        .map_err(|e| ConfigError::ParseError(format!("failed to parse TOML: {e}")))?;

    if let Err(e) = validation::validate(&config) {
        warn!(
            "config validation warning: {e} — using parsed config with potentially invalid values"
        );
    }

    info!("loaded config from {}", path.display());
    Ok(config)
}

/// Load config from the platform-specific default path.
///
/// If the file does not exist, creates a default config file and returns
/// defaults.
pub fn load_default() -> Result<PorticoConfig, ConfigError> {
    let path = default_config_path()?;

    match load_from_path(&path) {
        Ok(config) => Ok(config),
        Err(ConfigError::FileNotFound(_)) => {
            info!("no config found at {}, creating default", path.display());
            create_default_config(&path)?;
            Ok(PorticoConfig::default())
        }
        Err(e) => Err(e),
    }
}
