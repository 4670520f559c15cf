use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ParseError(String),

    #[error("config validation error: {0}")]
    ValidationError(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error("not connected")]
    NotConnected,

    #[error("topic already subscribed: {0}")]
    TopicInUse(String),

    #[error("channel join failed on {topic}: {reason}")]
    JoinFailed { topic: String, reason: String },

    #[error("websocket error: {0}")]
    Transport(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),

    #[error("api error: HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PorticoError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Realtime(#[from] RealtimeError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = ConfigError::FileNotFound(PathBuf::from("/tmp/missing.toml"));
        assert_eq!(err.to_string(), "config file not found: /tmp/missing.toml");

        let err = ConfigError::ParseError("unexpected token".into());
        assert_eq!(err.to_string(), "config parse error: unexpected token");

        let err = ConfigError::ValidationError("custom_status too long".into());
        assert_eq!(
            err.to_string(),
            "config validation error: custom_status too long"
        );
    }

    #[test]
    fn realtime_error_display() {
        let err = RealtimeError::TopicInUse("feed:notifications".into());
        assert_eq!(
            err.to_string(),
            "topic already subscribed: feed:notifications"
        );

        let err = RealtimeError::JoinFailed {
            topic: "presence:portal".into(),
            reason: "unauthorized".into(),
        };
        assert_eq!(
            err.to_string(),
            "channel join failed on presence:portal: unauthorized"
        );
    }

    #[test]
    fn api_error_display() {
        let err = ApiError::Status {
            status: 404,
            body: "not found".into(),
        };
        assert_eq!(err.to_string(), "api error: HTTP 404: not found");

        let err = ApiError::Network("timeout".into());
        assert_eq!(err.to_string(), "network error: timeout");
    }

    #[test]
    fn portico_error_from_config() {
        let config_err = ConfigError::ParseError("bad toml".into());
        let err: PorticoError = config_err.into();
        assert!(matches!(err, PorticoError::Config(_)));
        assert!(err.to_string().contains("bad toml"));
    }

    #[test]
    fn portico_error_from_realtime() {
        let rt_err = RealtimeError::NotConnected;
        let err: PorticoError = rt_err.into();
        assert!(matches!(err, PorticoError::Realtime(_)));
        assert_eq!(err.to_string(), "not connected");
    }

    #[test]
    fn portico_error_from_api() {
        let api_err = ApiError::Decode("missing field `id`".into());
        let err: PorticoError = api_err.into();
        assert!(matches!(err, PorticoError::Api(_)));
        assert!(err.to_string().contains("missing field `id`"));
    }
}
