//! Config validation: range and format checks applied after parsing.

use portico_common::ConfigError;

use crate::schema::PorticoConfig;

fn err(msg: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(msg.into())
}

/// Validate a parsed config. Empty URLs are allowed (the config template
/// ships without endpoints); set URLs must carry the right scheme.
pub fn validate(config: &PorticoConfig) -> Result<(), ConfigError> {
    let rt = &config.realtime;
    if !rt.url.is_empty() && !rt.url.starts_with("ws://") && !rt.url.starts_with("wss://") {
        return Err(err(format!(
            "realtime.url must be a ws:// or wss:// endpoint, got '{}'",
            rt.url
        )));
    }
    if rt.heartbeat_interval_secs < 5 || rt.heartbeat_interval_secs > 300 {
        return Err(err(format!(
            "realtime.heartbeat_interval_secs must be in 5..=300, got {}",
            rt.heartbeat_interval_secs
        )));
    }
    if rt.reconnect_delay_secs == 0 {
        return Err(err("realtime.reconnect_delay_secs must be at least 1"));
    }
    if rt.max_reconnect_delay_secs < rt.reconnect_delay_secs {
        return Err(err(format!(
            "realtime.max_reconnect_delay_secs ({}) must be >= reconnect_delay_secs ({})",
            rt.max_reconnect_delay_secs, rt.reconnect_delay_secs
        )));
    }

    let api = &config.api;
    if !api.base_url.is_empty()
        && !api.base_url.starts_with("http://")
        && !api.base_url.starts_with("https://")
    {
        return Err(err(format!(
            "api.base_url must be an http(s) endpoint, got '{}'",
            api.base_url
        )));
    }

    let presence = &config.presence;
    if presence.room.is_empty() {
        return Err(err("presence.room must not be empty"));
    }
    if presence.retrack_interval_secs < 5 {
        return Err(err(format!(
            "presence.retrack_interval_secs must be at least 5, got {}",
            presence.retrack_interval_secs
        )));
    }

    if config.logging.level.is_empty() {
        return Err(err("logging.level must not be empty"));
    }

    Ok(())
}
