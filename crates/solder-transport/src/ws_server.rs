//! The reverse WebSocket connector: the endpoint dials the bot.
//!
//! The listener accepts exactly one peer at a time; a second handshake
//! while one is live is answered 403. When the peer disconnects the state
//! is discarded and, if reconnection is allowed, the listener waits for
//! the next connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    extract::{
        ConnectInfo, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use solder_core::{TransportError, TransportResult};

use crate::link::{LinkEvent, LinkMonitor};
use crate::output::OutputPacer;
use crate::{Connector, ConnectorIo, classify_frame};

/// Configuration for [`ReverseWsConn`].
#[derive(Debug, Clone)]
pub struct WsServerConfig {
    /// Listen host.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Cooldown between consecutive outbound writes.
    pub cd_time: Duration,
    /// Whether to wait for a new peer after a disconnect instead of
    /// stopping the bot.
    pub allow_reconnect: bool,
}

impl WsServerConfig {
    /// A config listening on the given address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            cd_time: Duration::from_millis(200),
            allow_reconnect: false,
        }
    }
}

/// WebSocket server connector.
pub struct ReverseWsConn {
    config: WsServerConfig,
}

impl ReverseWsConn {
    /// Creates the connector.
    pub fn new(config: WsServerConfig) -> Self {
        Self { config }
    }
}

/// Shared state between the axum handler and the run loop.
struct ListenerShared {
    /// Whether a peer currently holds the single slot.
    occupied: AtomicBool,
    /// Hands accepted sockets to the run loop.
    socket_tx: mpsc::Sender<(WebSocket, SocketAddr)>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(shared): State<Arc<ListenerShared>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    // Single-peer policy: a second handshake is refused while one is live.
    if shared.occupied.swap(true, Ordering::SeqCst) {
        warn!(remote_addr = %addr, "second connection refused, peer slot occupied");
        return (
            StatusCode::FORBIDDEN,
            "the unique connection is already accepted\n",
        )
            .into_response();
    }
    info!(remote_addr = %addr, "WebSocket peer connecting");
    ws.on_upgrade(move |socket| async move {
        if shared.socket_tx.send((socket, addr)).await.is_err() {
            shared.occupied.store(false, Ordering::SeqCst);
        }
    })
    .into_response()
}

#[async_trait]
impl Connector for ReverseWsConn {
    async fn run(&self, mut io: ConnectorIo) -> TransportResult<()> {
        let monitor = LinkMonitor::new();
        let mut pacer = OutputPacer::new(self.config.cd_time);

        let (socket_tx, mut socket_rx) = mpsc::channel(1);
        let shared = Arc::new(ListenerShared {
            occupied: AtomicBool::new(false),
            socket_tx,
        });

        let router = Router::new()
            .route("/", get(ws_handler))
            .with_state(Arc::clone(&shared));
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(TransportError::from)?;
        info!(addr = %addr, "WebSocket server listening, waiting for the endpoint");
        monitor.mark_opening();

        // A child token so the listener can be stopped without tearing down
        // the whole bot when the connector ends on its own.
        let server_token = io.shutdown.child_token();
        let server_shutdown = server_token.clone();
        let server = tokio::spawn(async move {
            let serve = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await });
            if let Err(err) = serve.await {
                warn!(error = %err, "WebSocket server error");
            }
        });

        loop {
            let (socket, addr) = tokio::select! {
                _ = io.shutdown.cancelled() => break,
                socket = socket_rx.recv() => match socket {
                    Some(pair) => pair,
                    None => break,
                },
            };

            info!(remote_addr = %addr, "endpoint connected");
            monitor.mark_open();
            let done = run_peer(&mut io, &monitor, &mut pacer, socket).await;
            shared.occupied.store(false, Ordering::SeqCst);

            if done {
                break;
            }
            monitor.mark_relinking();
            io.sink.on_link(LinkEvent::Dropped).await;
            if !self.config.allow_reconnect {
                debug!("endpoint disconnected and reconnection is disabled");
                break;
            }
            warn!("endpoint disconnected, waiting for it to reconnect");
            monitor.mark_opening();
        }

        server_token.cancel();
        let _ = server.await;
        monitor.mark_closed();
        io.sink.on_link(LinkEvent::Closed).await;
        Ok(())
    }
}

/// Drives one accepted peer. Returns true on orderly shutdown, false when
/// the peer went away.
async fn run_peer(
    io: &mut ConnectorIo,
    monitor: &LinkMonitor,
    pacer: &mut OutputPacer,
    socket: WebSocket,
) -> bool {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let sink = Arc::clone(&io.sink);
    let shutdown = io.shutdown.clone();
    let actions = &mut io.actions;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("WebSocket server shutting down");
                let _ = ws_tx.close().await;
                return true;
            }

            action = actions.recv() => {
                let Some(action) = action else {
                    return true;
                };
                sink.presend(&action).await;
                pacer.pace().await;
                let frame = action.flatten();
                trace!(action = %action.ty, len = frame.len(), "sending action");
                if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                    warn!(action = %action.ty, "send failed, peer gone");
                    return false;
                }
                pacer.mark_sent();
                if let Some(event) = monitor.mark_peer_io() {
                    sink.on_link(event).await;
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(event) = monitor.mark_peer_io() {
                            sink.on_link(event).await;
                        }
                        if let Some(frame) = classify_frame(text.as_str()) {
                            sink.on_frame(frame).await;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        if let Some(event) = monitor.mark_peer_io() {
                            sink.on_link(event).await;
                        }
                        if let Ok(text) = std::str::from_utf8(&data) {
                            if let Some(frame) = classify_frame(text) {
                                sink.on_frame(frame).await;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        trace!("keepalive frame");
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!("peer closed the connection");
                        return false;
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "WebSocket error, peer dropped");
                        return false;
                    }
                    None => {
                        debug!("peer stream ended");
                        return false;
                    }
                }
            }
        }
    }
}
