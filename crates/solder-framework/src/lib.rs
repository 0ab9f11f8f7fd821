//! # solder-framework
//!
//! The dispatch and conversation machinery of the solder bot framework.
//!
//! ## Architecture
//!
//! Inbound events flow through the [`Dispatcher`], which walks each
//! channel's handlers in priority order. A [`Handler`] admits an event
//! through its checker/matcher/parser stack, then runs its body inside a
//! session obtained from the [`SessionManager`] — the keyed conversation
//! store with suspend/resume and deadlock-free conflict waiting. Bodies
//! talk back to the endpoint through the [`Responder`], which correlates
//! actions with their echo responses.
//!
//! ```text
//! Event ──▶ Dispatcher ──▶ Handler ──▶ SessionManager
//!                             │              │
//!                             ▼              ▼
//!                         Ctx (body) ◀── Session
//!                             │
//!                             ▼
//!                         Responder ──▶ transport
//! ```
//!
//! Cross-plugin coordination runs over the [`HookBus`] (lifecycle
//! moments), the [`PluginBus`] (named signals) and the [`PluginStore`]
//! (shared objects).

pub mod checker;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod hook;
pub mod ipc;
pub mod logic;
pub mod matcher;
pub mod parser;
pub mod plugin;
pub mod responder;
pub mod rule;
pub mod session;
pub mod signal;

pub use checker::{
    AtMsgChecker, Checker, CheckerExt, FnChecker, LevelCheckerFactory, LevelRoster, MsgLvlChecker,
    UserLevel, WrappedChecker,
};
pub use context::{BotServices, Ctx};
pub use dispatcher::Dispatcher;
pub use error::{
    HandlerError, HandlerResult, IpcError, IpcResult, ParserError, ParserResult, SessionError,
    SessionResult,
};
pub use handler::{Handler, HandlerBuilder};
pub use hook::{BotLife, HookArg, HookBus, HookFn};
pub use ipc::{PluginBus, PluginStore, ShareObject};
pub use logic::LogicMode;
pub use matcher::{
    ContainMatcher, EndMatcher, FullMatcher, Matcher, MatcherExt, RegexMatcher, StartMatcher,
    WrappedMatcher,
};
pub use parser::{ArgFormatter, CmdParser, CmdParserFactory, FormatFailure, FormatInfo, ParseArgs};
pub use plugin::{Plugin, PluginBuilder};
pub use responder::{ActionHandle, ECHO_CAP, OUTPUT_CAP, Responder, with_require_echo};
pub use rule::{AttrRule, FnRule, SessionRule};
pub use session::{HandlerId, Session, SessionManager, SessionProfile, SessionState};
pub use signal::Signal;

/// Prelude for common imports.
pub mod prelude {
    pub use super::{
        AttrRule, BotLife, BotServices, Ctx, Dispatcher, Handler, Plugin, Responder, SessionRule,
    };
}
