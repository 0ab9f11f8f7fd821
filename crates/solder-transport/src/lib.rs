//! # solder-transport
//!
//! The connectors of the solder bot framework: framed, ordered exchange
//! with a OneBot v11 endpoint over one of three interchangeable transports.
//!
//! | Connector | Transport | Module |
//! |-----------|-----------|--------|
//! | [`ForwardWsConn`] | WebSocket client (bot dials the endpoint) | [`ws_client`] |
//! | [`ReverseWsConn`] | WebSocket server (endpoint dials the bot, single peer) | [`ws_server`] |
//! | [`DuplexHttpConn`] | HTTP client + server pair | [`http`] |
//!
//! All three share one upward contract: inbound frames are classified into
//! event frames and echo frames and pushed into a [`FrameSink`]; outbound
//! [`Action`]s are drained from a bounded queue with cooldown pacing and a
//! presend hook. Link health flows through [`LinkEvent`]s, following the
//! shared state machine in [`link`].

pub mod link;
pub mod output;

#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "ws-client")]
pub mod ws_client;
#[cfg(feature = "ws-server")]
pub mod ws_server;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use solder_core::{Action, EchoResponse, Event, TransportResult};

pub use link::{LinkEvent, LinkMonitor, LinkState, classify_frame};
pub use output::OutputPacer;

#[cfg(feature = "http")]
pub use http::{DuplexHttpConn, HttpConfig};
#[cfg(feature = "ws-client")]
pub use ws_client::{ForwardWsConn, WsClientConfig};
#[cfg(feature = "ws-server")]
pub use ws_server::{ReverseWsConn, WsServerConfig};

/// One inbound frame, already classified.
#[derive(Debug)]
pub enum InboundFrame {
    /// An event frame, to be dispatched.
    Event(Event),
    /// An echo frame, to be routed to the waiting action.
    Echo(EchoResponse),
}

/// The upward contract of every connector.
///
/// The supervisor implements this to wire frames into the dispatcher and
/// responder, and link events into the lifecycle hook bus.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// A classified inbound frame arrived.
    async fn on_frame(&self, frame: InboundFrame);

    /// An action is about to be written to the peer.
    async fn presend(&self, action: &Action);

    /// The link changed state.
    async fn on_link(&self, event: LinkEvent);
}

/// Everything a connector needs to run.
pub struct ConnectorIo {
    /// Where inbound frames and link events go.
    pub sink: Arc<dyn FrameSink>,
    /// The outbound action queue (bounded by the responder).
    pub actions: mpsc::Receiver<Action>,
    /// Cooperative shutdown.
    pub shutdown: CancellationToken,
}

/// A transport connector.
///
/// `run` owns the connection for the bot's whole lifetime: it dials or
/// listens, relinks per its own policy, and returns when shut down (or
/// with the fatal error that ended the link).
#[async_trait]
pub trait Connector: Send + Sync {
    /// Runs the connector until shutdown or a fatal transport error.
    async fn run(&self, io: ConnectorIo) -> TransportResult<()>;
}
