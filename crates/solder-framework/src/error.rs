//! Framework-level error types.
//!
//! Wire-facing errors (`TransportError`, `ProtocolError`, `ActionError`)
//! live in solder-core; the errors here cover misuse of sessions, handler
//! registration, parser construction and plugin IPC.

use thiserror::Error;

// =============================================================================
// Session Errors
// =============================================================================

/// Errors raised by session operations.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// `hup` was called on a one-shot session.
    #[error("a session without a session rule cannot be suspended")]
    OneShot,

    /// The operation targeted an expired session.
    #[error("the session is expired")]
    Expired,

    /// The suspension timed out before a matching event arrived.
    #[error("session suspension timed out")]
    Timeout,

    /// A zero suspension timeout was requested.
    #[error("suspension timeout must be greater than zero")]
    ZeroTimeout,

    /// The handler has no registered session space.
    #[error("no session space registered for handler {0}")]
    UnknownSpace(u64),
}

// =============================================================================
// Handler Registration Errors
// =============================================================================

/// Errors raised while building a handler descriptor.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    /// A matcher and a parser were both supplied.
    #[error("a handler cannot have both a matcher and a parser")]
    MatcherAndParser,

    /// Text matching was requested outside the message channel.
    #[error("matchers and parsers only apply to message handlers")]
    TextOnNonMessage,

    /// Session options were supplied without a session rule.
    #[error("hold, direct_rouse and conflict options require a session rule")]
    OptionsRequireRule,

    /// `conflict_wait` and a conflict callback are mutually exclusive.
    #[error("a conflict callback is never invoked when conflict_wait is set")]
    ConflictWaitWithCallback,

    /// The handler has no executor.
    #[error("a handler needs an executor")]
    MissingExecutor,
}

// =============================================================================
// Parser Errors
// =============================================================================

/// Errors raised while constructing a command parser.
#[derive(Debug, Clone, Error)]
pub enum ParserError {
    /// A command token contains a character the parser cannot split on.
    #[error("unsupported character in command token `{0}`")]
    BannedToken(String),

    /// Start tokens and separator tokens overlap.
    #[error("command start tokens and separator tokens must be disjoint")]
    OverlappingTokens,

    /// A default-replace sentinel was configured without a default value.
    #[error("a default-replace flag requires a default value")]
    ReplaceFlagWithoutDefault,
}

// =============================================================================
// IPC Errors
// =============================================================================

/// Errors raised by the plugin signal bus and shared-object store.
#[derive(Debug, Clone, Error)]
pub enum IpcError {
    /// A second handler was registered for the same signal channel.
    #[error("signal `{namespace}.{signal}` already has a handler")]
    DuplicateSignal {
        /// Signal namespace.
        namespace: String,
        /// Signal name.
        signal: String,
    },

    /// A signal was emitted into a namespace nobody declared.
    #[error("signal namespace `{0}` does not exist")]
    UnknownNamespace(String),

    /// A second mutator was bound to the same shared object.
    #[error("shared object `{namespace}.{id}` already has a mutator")]
    MutatorRebound {
        /// Shared object namespace.
        namespace: String,
        /// Shared object id.
        id: String,
    },
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Result type for handler registration.
pub type HandlerResult<T> = Result<T, HandlerError>;

/// Result type for parser construction.
pub type ParserResult<T> = Result<T, ParserError>;

/// Result type for IPC operations.
pub type IpcResult<T> = Result<T, IpcError>;
