//! Configuration schema.
//!
//! ```toml
//! name = "my-bot"
//!
//! [logging]
//! level = "debug"
//!
//! [connection]
//! type = "ws-client"
//! url = "ws://127.0.0.1:8080"
//! access_token = "s3cret"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{ConfigError, ConfigResult};

/// Root configuration for one bot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// The bot's name; unique within the process.
    pub name: String,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// The transport to the endpoint.
    pub connection: ConnectionConfig,
    /// Grace period for draining in-flight handler bodies at shutdown.
    #[serde(with = "millis")]
    pub shutdown_grace: Duration,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: "solder-bot".to_string(),
            logging: LoggingConfig::default(),
            connection: ConnectionConfig::default(),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `solder=debug,info`.
    pub level: String,
    /// Log to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Transport selection and parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ConnectionConfig {
    /// The bot dials the endpoint over WebSocket.
    WsClient {
        /// Endpoint URL, e.g. `ws://127.0.0.1:8080`.
        url: String,
        /// Bearer token for the handshake.
        #[serde(default)]
        access_token: Option<String>,
        /// Connection attempts before giving up.
        #[serde(default = "default_max_retry")]
        max_retry: u32,
        /// Base delay between attempts.
        #[serde(default = "default_retry_delay", with = "millis")]
        retry_delay: Duration,
        /// Cooldown between outbound writes.
        #[serde(default = "default_cd_time", with = "millis")]
        cd_time: Duration,
    },
    /// The endpoint dials the bot over WebSocket (single peer).
    WsServer {
        /// Listen host.
        host: String,
        /// Listen port.
        port: u16,
        /// Cooldown between outbound writes.
        #[serde(default = "default_cd_time", with = "millis")]
        cd_time: Duration,
        /// Wait for a new peer after a disconnect.
        #[serde(default)]
        allow_reconnect: bool,
    },
    /// HTTP duplex: POST actions out, accept event reports in.
    Http {
        /// Base URL of the endpoint's HTTP API.
        api_url: String,
        /// Listen host for reports.
        host: String,
        /// Listen port for reports.
        port: u16,
        /// Cooldown between outbound posts.
        #[serde(default = "default_cd_time", with = "millis")]
        cd_time: Duration,
        /// Shared secret for report signature verification.
        #[serde(default)]
        secret: Option<String>,
        /// Offline watchdog interval.
        #[serde(default, with = "opt_millis")]
        max_interval: Option<Duration>,
        /// Wait for the endpoint to come back instead of stopping.
        #[serde(default)]
        allow_reconnect: bool,
    },
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig::WsServer {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cd_time: default_cd_time(),
            allow_reconnect: false,
        }
    }
}

fn default_max_retry() -> u32 {
    5
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_cd_time() -> Duration {
    Duration::from_millis(200)
}

/// Durations serialize as integer milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Optional durations serialize as integer milliseconds.
mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => serializer.serialize_some(&(value.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Validates a loaded configuration.
pub fn validate_config(config: &BotConfig) -> ConfigResult<()> {
    if config.name.is_empty() {
        return Err(ConfigError::invalid("name", "must not be empty"));
    }
    match &config.connection {
        ConnectionConfig::WsClient { url, .. } => {
            if !url.starts_with("ws://") && !url.starts_with("wss://") {
                return Err(ConfigError::invalid(
                    "connection.url",
                    format!("`{url}` is not a ws:// or wss:// URL"),
                ));
            }
        }
        ConnectionConfig::WsServer { port, .. } => {
            if *port == 0 {
                return Err(ConfigError::invalid("connection.port", "must not be 0"));
            }
        }
        ConnectionConfig::Http {
            api_url,
            port,
            max_interval,
            ..
        } => {
            if !api_url.starts_with("http://") && !api_url.starts_with("https://") {
                return Err(ConfigError::invalid(
                    "connection.api_url",
                    format!("`{api_url}` is not an http:// or https:// URL"),
                ));
            }
            if *port == 0 {
                return Err(ConfigError::invalid("connection.port", "must not be 0"));
            }
            if max_interval == &Some(Duration::ZERO) {
                return Err(ConfigError::invalid(
                    "connection.max_interval",
                    "must be greater than zero",
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        validate_config(&BotConfig::default()).unwrap();
    }

    #[test]
    fn test_bad_ws_url_rejected() {
        let config = BotConfig {
            connection: ConnectionConfig::WsClient {
                url: "http://nope".to_string(),
                access_token: None,
                max_retry: 1,
                retry_delay: Duration::from_secs(1),
                cd_time: Duration::from_millis(200),
            },
            ..BotConfig::default()
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_connection_tag_round_trip() {
        let config = BotConfig {
            connection: ConnectionConfig::WsClient {
                url: "ws://127.0.0.1:8080".to_string(),
                access_token: Some("token".to_string()),
                max_retry: 3,
                retry_delay: Duration::from_millis(500),
                cd_time: Duration::from_millis(100),
            },
            ..BotConfig::default()
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["connection"]["type"], "ws-client");
        assert_eq!(json["connection"]["retry_delay"], 500);
        let back: BotConfig = serde_json::from_value(json).unwrap();
        validate_config(&back).unwrap();
    }
}
