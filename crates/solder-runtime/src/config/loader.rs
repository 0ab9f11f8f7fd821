//! Configuration loading via figment.
//!
//! Sources merge in order: defaults, then a TOML file, then `SOLDER_*`
//! environment variables (double underscore as the section separator, so
//! `SOLDER_CONNECTION__URL` targets `connection.url`).

use std::path::Path;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use tracing::info;

use super::error::{ConfigError, ConfigResult};
use super::schema::{BotConfig, validate_config};

/// The environment variable prefix.
const ENV_PREFIX: &str = "SOLDER_";

/// Loads configuration from a TOML file plus the environment.
pub fn load_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<BotConfig> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.to_path_buf()));
    }
    info!(path = %path.display(), "loading configuration");
    extract(Figment::from(Serialized::defaults(BotConfig::default())).merge(Toml::file(path)))
}

/// Loads configuration from the environment only.
pub fn load_from_env() -> ConfigResult<BotConfig> {
    extract(Figment::from(Serialized::defaults(BotConfig::default())))
}

/// Loads configuration from a TOML string (tests and embedding).
pub fn load_from_str(toml: &str) -> ConfigResult<BotConfig> {
    extract(Figment::from(Serialized::defaults(BotConfig::default())).merge(Toml::string(toml)))
}

fn extract(figment: Figment) -> ConfigResult<BotConfig> {
    let config: BotConfig = figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()?;
    validate_config(&config)?;
    Ok(config)
}
