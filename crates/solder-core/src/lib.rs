//! # solder-core
//!
//! The data model of the solder bot framework: typed OneBot v11 events,
//! message segments with the CQ-string codec, outbound actions with echo
//! correlation ids, and the shared error taxonomy.
//!
//! ## Layers
//!
//! - **Events** ([`Event`]): inbound frames resolved by `post_type` into a
//!   closed sum, raw map preserved, flag-bag attached.
//! - **Messages** ([`Message`], [`Segment`]): segment lists isomorphic to
//!   the CQ string form ([`cq`]).
//! - **Actions** ([`Action`], [`EchoResponse`]): outbound commands and the
//!   responses routed back by echo id.
//!
//! Everything here is transport-agnostic; the connectors live in
//! `solder-transport` and the dispatch machinery in `solder-framework`.

pub mod action;
pub mod cq;
pub mod error;
pub mod event;
pub mod flag;
pub mod message;
pub mod ops;
pub mod segment;

pub use action::{Action, EchoResponse, echo_key, next_echo_id};
pub use error::{
    ActionError, ActionResult, ProtocolError, ProtocolResult, TransportError, TransportResult,
};
pub use event::{
    Anonymous, Event, EventKind, EventType, MessageEvent, MessageScope, MetaEvent, MetaKind,
    NoticeEvent, NoticeKind, RequestEvent, RequestKind, Sender,
};
pub use flag::FlagStore;
pub use message::Message;
pub use segment::Segment;

/// Prelude for common imports.
pub mod prelude {
    pub use super::{
        Action, EchoResponse, Event, EventKind, EventType, Message, MessageEvent, Segment,
    };
}
