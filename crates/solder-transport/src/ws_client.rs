//! The forward WebSocket connector: the bot dials the endpoint.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite};
use tracing::{debug, info, trace, warn};

use solder_core::{TransportError, TransportResult};

use crate::link::{LinkEvent, LinkMonitor};
use crate::output::OutputPacer;
use crate::{Connector, ConnectorIo, classify_frame};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, tungstenite::Message>;
type WsSource = SplitStream<WsStream>;

/// Reconnect delays grow exponentially from `retry_delay` up to this cap.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Configuration for [`ForwardWsConn`].
#[derive(Debug, Clone)]
pub struct WsClientConfig {
    /// The endpoint URL, e.g. `ws://127.0.0.1:8080`.
    pub url: String,
    /// Bearer token sent in the `Authorization` header.
    pub access_token: Option<String>,
    /// Connection attempts before giving up for good.
    pub max_retry: u32,
    /// Base delay between connection attempts.
    pub retry_delay: Duration,
    /// Cooldown between consecutive outbound writes.
    pub cd_time: Duration,
}

impl WsClientConfig {
    /// A config with the default retry and pacing parameters.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            access_token: None,
            max_retry: 5,
            retry_delay: Duration::from_secs(2),
            cd_time: Duration::from_millis(200),
        }
    }

    /// Sets the bearer token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }
}

/// WebSocket client connector.
pub struct ForwardWsConn {
    config: WsClientConfig,
}

impl ForwardWsConn {
    /// Creates the connector.
    pub fn new(config: WsClientConfig) -> Self {
        Self { config }
    }

    async fn dial(&self) -> TransportResult<WsStream> {
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|err| TransportError::InvalidConfig(err.to_string()))?;
        if let Some(token) = &self.config.access_token {
            let value = format!("Bearer {token}")
                .parse()
                .map_err(|_| TransportError::InvalidConfig("access token is not a valid header value".into()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        match connect_async(request).await {
            Ok((stream, _resp)) => Ok(stream),
            Err(tungstenite::Error::Http(resp))
                if resp.status() == 401 || resp.status() == 403 =>
            {
                Err(TransportError::AuthRejected {
                    url: self.config.url.clone(),
                })
            }
            Err(err) => Err(TransportError::ConnectFailed {
                url: self.config.url.clone(),
                reason: err.to_string(),
            }),
        }
    }

    /// Dials with capped exponential retry. Auth rejection is fatal and
    /// never retried.
    async fn dial_with_retry(&self, io: &ConnectorIo) -> TransportResult<Option<WsStream>> {
        let mut delay = self.config.retry_delay;
        for attempt in 0..=self.config.max_retry {
            if attempt > 0 {
                warn!(
                    url = %self.config.url,
                    attempt,
                    delay = ?delay,
                    "retrying WebSocket connection"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = io.shutdown.cancelled() => return Ok(None),
                }
                delay = std::cmp::min(delay.saturating_mul(2), MAX_RETRY_DELAY);
            }
            match self.dial().await {
                Ok(stream) => {
                    info!(url = %self.config.url, "WebSocket connected");
                    return Ok(Some(stream));
                }
                Err(err @ TransportError::AuthRejected { .. }) => return Err(err),
                Err(err) => warn!(url = %self.config.url, error = %err, "WebSocket connection failed"),
            }
        }
        Err(TransportError::ConnectFailed {
            url: self.config.url.clone(),
            reason: format!("gave up after {} attempts", self.config.max_retry + 1),
        })
    }
}

#[async_trait]
impl Connector for ForwardWsConn {
    async fn run(&self, mut io: ConnectorIo) -> TransportResult<()> {
        let monitor = LinkMonitor::new();
        let mut pacer = OutputPacer::new(self.config.cd_time);

        loop {
            monitor.mark_opening();
            let stream = match self.dial_with_retry(&io).await {
                Ok(Some(stream)) => stream,
                Ok(None) => {
                    monitor.mark_closed();
                    io.sink.on_link(LinkEvent::Closed).await;
                    return Ok(());
                }
                Err(err) => {
                    monitor.mark_closed();
                    io.sink.on_link(LinkEvent::Closed).await;
                    return Err(err);
                }
            };
            monitor.mark_open();

            let (mut ws_tx, mut ws_rx) = stream.split();
            let done = run_link(&mut io, &monitor, &mut pacer, &mut ws_tx, &mut ws_rx).await;
            if done {
                let _ = ws_tx.close().await;
                monitor.mark_closed();
                io.sink.on_link(LinkEvent::Closed).await;
                return Ok(());
            }

            monitor.mark_relinking();
            io.sink.on_link(LinkEvent::Dropped).await;
        }
    }
}

/// Drives one established connection. Returns true on orderly shutdown,
/// false when the link dropped and a relink should follow.
async fn run_link(
    io: &mut ConnectorIo,
    monitor: &LinkMonitor,
    pacer: &mut OutputPacer,
    ws_tx: &mut WsSink,
    ws_rx: &mut WsSource,
) -> bool {
    let sink = Arc::clone(&io.sink);
    let shutdown = io.shutdown.clone();
    let actions = &mut io.actions;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("WebSocket client shutting down");
                return true;
            }

            action = actions.recv() => {
                let Some(action) = action else {
                    // The responder side is gone; nothing left to send.
                    return true;
                };
                sink.presend(&action).await;
                pacer.pace().await;
                let frame = action.flatten();
                trace!(action = %action.ty, len = frame.len(), "sending action");
                if ws_tx.send(tungstenite::Message::Text(frame.into())).await.is_err() {
                    warn!(action = %action.ty, "send failed, link dropped");
                    return false;
                }
                pacer.mark_sent();
                if let Some(event) = monitor.mark_peer_io() {
                    sink.on_link(event).await;
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        if let Some(event) = monitor.mark_peer_io() {
                            sink.on_link(event).await;
                        }
                        if let Some(frame) = classify_frame(text.as_str()) {
                            sink.on_frame(frame).await;
                        }
                    }
                    Some(Ok(tungstenite::Message::Binary(data))) => {
                        if let Some(event) = monitor.mark_peer_io() {
                            sink.on_link(event).await;
                        }
                        if let Ok(text) = std::str::from_utf8(&data) {
                            if let Some(frame) = classify_frame(text) {
                                sink.on_frame(frame).await;
                            }
                        }
                    }
                    Some(Ok(tungstenite::Message::Ping(data))) => {
                        let _ = ws_tx.send(tungstenite::Message::Pong(data)).await;
                    }
                    Some(Ok(tungstenite::Message::Pong(_))) => {
                        trace!("pong received");
                    }
                    Some(Ok(_)) => {
                        debug!("endpoint closed the connection");
                        return false;
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "WebSocket error, link dropped");
                        return false;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        return false;
                    }
                }
            }
        }
    }
}
