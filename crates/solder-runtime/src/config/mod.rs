//! Bot configuration: schema, loading and validation.

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_from_env, load_from_file, load_from_str};
pub use schema::{BotConfig, ConnectionConfig, LoggingConfig, validate_config};
