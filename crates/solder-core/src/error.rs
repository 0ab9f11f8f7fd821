//! Unified error types for the solder core model.
//!
//! Framework-level errors (session and IPC misuse) are defined in
//! solder-framework; everything that crosses the wire lives here.

use thiserror::Error;

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors that can occur in transport operations.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The endpoint could not be reached after the configured retries.
    #[error("connection failed: {url} - {reason}")]
    ConnectFailed {
        /// The URL that failed to connect.
        url: String,
        /// Reason for failure.
        reason: String,
    },

    /// The handshake was rejected by the peer.
    #[error("authentication rejected by {url}")]
    AuthRejected {
        /// The URL that rejected the handshake.
        url: String,
    },

    /// The link closed while frames were still expected.
    #[error("link closed: {reason}")]
    LinkClosed {
        /// Reason for closure.
        reason: String,
    },

    /// Frame send failed.
    #[error("failed to send frame: {0}")]
    SendFailed(String),

    /// Invalid configuration.
    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

// =============================================================================
// Protocol Errors
// =============================================================================

/// Errors raised while decoding inbound frames or encoding outbound ones.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    /// The frame was not valid JSON.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The frame was valid JSON but not a valid event.
    #[error("failed to build event: {reason}")]
    BadEvent {
        /// Reason for failure.
        reason: String,
    },

    /// A required field was missing or had the wrong type.
    #[error("missing or invalid field `{0}`")]
    BadField(&'static str),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedFrame(err.to_string())
    }
}

// =============================================================================
// Action Errors
// =============================================================================

/// Errors surfaced to a handler that issued an action.
#[derive(Debug, Clone, Error)]
pub enum ActionError {
    /// The outbound queue is at capacity; the action was rejected.
    #[error("outbound action queue is full")]
    OutputOverflow,

    /// The pending-echo table is at capacity; the action was rejected.
    #[error("too many actions awaiting a response")]
    EchoOverflow,

    /// The awaited response never arrived in time.
    #[error("timed out waiting for the action response")]
    EchoTimeout,

    /// The transport closed before the response arrived.
    #[error("link closed before the action response arrived")]
    LinkClosed,

    /// The action was issued without requesting a response.
    #[error("action was sent without requesting a response")]
    NoEchoRequested,

    /// The action was issued from an expired session.
    #[error("cannot issue actions from an expired session")]
    SessionExpired,

    /// A reply was requested but the session event is not a message.
    #[error("the session event cannot be replied to")]
    NoReplyTarget,
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for frame codec operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Result type for action operations.
pub type ActionResult<T> = Result<T, ActionError>;
