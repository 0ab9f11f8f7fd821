//! Runtime error types.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced by the bot supervisor.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Configuration loading or validation failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The transport failed fatally.
    #[error(transparent)]
    Transport(#[from] solder_core::TransportError),

    /// A plugin failed to load.
    #[error("plugin load failed: {0}")]
    PluginLoad(#[from] solder_framework::IpcError),

    /// A bot with this name already exists in the process.
    #[error("a bot named `{0}` is already registered")]
    DuplicateBot(String),

    /// `run` was called twice on the same bot.
    #[error("the bot is already running or has finished")]
    AlreadyRan,
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
