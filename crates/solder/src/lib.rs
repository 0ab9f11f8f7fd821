//! # solder
//!
//! A chat-bot framework for the OneBot v11 protocol.
//!
//! solder mediates between an endpoint (a messaging gateway) and a set of
//! plugins: it receives raw events over WebSocket or HTTP, dispatches them
//! through a priority- and rule-aware handler graph, manages stateful
//! multi-turn conversations, and correlates outbound actions with their
//! responses by echo id.
//!
//! This crate is the facade; the work happens in its members:
//!
//! - [`solder_core`] — events, messages, the CQ codec, actions.
//! - [`solder_framework`] — dispatcher, sessions, checkers/matchers/
//!   parsers, hooks and plugin IPC.
//! - [`solder_transport`] — the WebSocket client/server and HTTP duplex
//!   connectors.
//! - [`solder_runtime`] — configuration, logging and the bot supervisor.
//!
//! ## A minimal bot
//!
//! ```rust,ignore
//! use solder::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = solder::config::load_from_file("solder.toml")?;
//!     let _log = solder::logging::init(&cfg.logging);
//!     let mut bot = Bot::new(cfg)?;
//!
//!     bot.load_plugin(
//!         Plugin::builder("echo")
//!             .handler(
//!                 Handler::on_message()
//!                     .matcher(StartMatcher::single("!echo "))
//!                     .executor(|ctx: Ctx| async move {
//!                         let text = ctx.text();
//!                         let reply = text.trim_start_matches("!echo ").to_string();
//!                         ctx.send(reply).await.ok();
//!                     })
//!                     .build()?,
//!             )
//!             .build(),
//!     )?;
//!
//!     bot.run().await?;
//!     Ok(())
//! }
//! ```

pub use solder_core as model;
pub use solder_framework as framework;
pub use solder_runtime as runtime;
pub use solder_transport as transport;

pub use solder_runtime::{Bot, BotCloser, BotConfig, config, logging};

/// Prelude for common imports.
pub mod prelude {
    pub use solder_core::{
        Action, EchoResponse, Event, EventKind, EventType, Message, MessageEvent, Segment, ops,
    };
    pub use solder_framework::{
        ArgFormatter, AtMsgChecker, AttrRule, BotLife, CmdParser, ContainMatcher, Ctx, EndMatcher,
        FullMatcher, Handler, LogicMode, Plugin, RegexMatcher, SessionRule, StartMatcher,
        UserLevel,
    };
    pub use solder_runtime::{Bot, BotCloser, BotConfig};
}
