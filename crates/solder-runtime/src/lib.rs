//! # solder-runtime
//!
//! Runtime orchestration for the solder bot framework: configuration
//! loading, logging setup, the process-wide bot registry, and the [`Bot`]
//! supervisor tying the transport to the dispatch machinery.
//!
//! ```rust,ignore
//! use solder_runtime::{Bot, config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cfg = config::load_from_file("solder.toml")?;
//!     let _guard = solder_runtime::logging::init(&cfg.logging);
//!
//!     let mut bot = Bot::new(cfg)?;
//!     bot.load_plugin(my_plugin())?;
//!
//!     let closer = bot.closer();
//!     tokio::spawn(async move {
//!         tokio::signal::ctrl_c().await.ok();
//!         closer.close().await;
//!     });
//!
//!     bot.run().await?;
//!     Ok(())
//! }
//! ```

pub mod bot;
pub mod config;
pub mod error;
pub mod logging;
pub mod registry;

pub use bot::{Bot, BotCloser};
pub use config::{BotConfig, ConfigError, ConnectionConfig, LoggingConfig};
pub use error::{RuntimeError, RuntimeResult};
