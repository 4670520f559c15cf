pub mod errors;
pub mod id;

pub use errors::{ApiError, ConfigError, PorticoError, RealtimeError};
pub use id::new_id;

pub type Result<T> = std::result::Result<T, PorticoError>;
