//! The HTTP duplex connector.
//!
//! Two legs share one logical link: a client leg POSTs each action to
//! `{base}/{action_type}` and treats the response body as the echo frame,
//! and a server leg accepts event reports as POSTs, optionally verifying
//! an `X-Signature: sha1=<hex>` HMAC of the raw body.
//!
//! HTTP is stateless, so the endpoint going away is only noticed when a
//! POST fails or, with `max_interval` configured, when no report arrives
//! for too long.

use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use solder_core::{Action, EchoResponse, TransportError, TransportResult};

use crate::link::{LinkEvent, LinkMonitor};
use crate::output::OutputPacer;
use crate::{Connector, ConnectorIo, FrameSink, InboundFrame, classify_frame};

type HmacSha1 = Hmac<Sha1>;

/// Configuration for [`DuplexHttpConn`].
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Base URL of the endpoint's HTTP API, e.g. `http://127.0.0.1:5700`.
    pub api_url: String,
    /// Listen host for inbound reports.
    pub host: String,
    /// Listen port for inbound reports.
    pub port: u16,
    /// Cooldown between consecutive outbound posts.
    pub cd_time: Duration,
    /// Shared secret for `X-Signature` verification of inbound reports.
    pub secret: Option<String>,
    /// With no report for this long the endpoint counts as offline.
    pub max_interval: Option<Duration>,
    /// Whether to wait for the endpoint to come back instead of stopping.
    pub allow_reconnect: bool,
    /// Per-request timeout of the client leg.
    pub request_timeout: Duration,
}

impl HttpConfig {
    /// A config with the default pacing and timeout parameters.
    pub fn new(api_url: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            api_url: api_url.into(),
            host: host.into(),
            port,
            cd_time: Duration::from_millis(200),
            secret: None,
            max_interval: None,
            allow_reconnect: false,
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Sets the inbound signature secret.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }
}

/// HTTP duplex connector.
pub struct DuplexHttpConn {
    config: HttpConfig,
}

impl DuplexHttpConn {
    /// Creates the connector.
    pub fn new(config: HttpConfig) -> Self {
        Self { config }
    }
}

/// Shared state between the report handler and the run loop.
struct ReportShared {
    sink: Arc<dyn FrameSink>,
    monitor: Arc<LinkMonitor>,
    secret: Option<String>,
    online_tx: watch::Sender<bool>,
    last_report: parking_lot::Mutex<tokio::time::Instant>,
}

async fn report_handler(
    State(shared): State<Arc<ReportShared>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if let Some(secret) = &shared.secret {
        let signature = headers
            .get("X-Signature")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        if !verify_signature(secret, &body, signature) {
            warn!("report with a bad or missing signature rejected");
            return StatusCode::UNAUTHORIZED;
        }
    }

    *shared.last_report.lock() = tokio::time::Instant::now();
    let was_online = shared.online_tx.send_replace(true);
    if !was_online {
        if let Some(event) = shared.monitor.mark_peer_io() {
            shared.sink.on_link(event).await;
        }
    }

    let Ok(text) = std::str::from_utf8(&body) else {
        warn!("non-UTF-8 report body dropped");
        return StatusCode::NO_CONTENT;
    };
    trace!(len = text.len(), "report received");
    if let Some(frame) = classify_frame(text) {
        shared.sink.on_frame(frame).await;
    }
    StatusCode::NO_CONTENT
}

/// Checks `sha1=<hex>` against the HMAC-SHA1 of the raw body.
fn verify_signature(secret: &str, body: &[u8], header: &str) -> bool {
    let Some(hex) = header.strip_prefix("sha1=") else {
        return false;
    };
    let mut mac =
        HmacSha1::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    let digest = mac.finalize().into_bytes();
    let mut expected = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(expected, "{byte:02x}");
    }
    expected.eq_ignore_ascii_case(hex)
}

#[async_trait]
impl Connector for DuplexHttpConn {
    async fn run(&self, mut io: ConnectorIo) -> TransportResult<()> {
        let monitor = Arc::new(LinkMonitor::new());
        let mut pacer = OutputPacer::new(self.config.cd_time);
        let (online_tx, mut online_rx) = watch::channel(false);

        let client = reqwest::Client::builder()
            .timeout(self.config.request_timeout)
            .build()
            .map_err(|err| TransportError::InvalidConfig(err.to_string()))?;

        let shared = Arc::new(ReportShared {
            sink: Arc::clone(&io.sink),
            monitor: Arc::clone(&monitor),
            secret: self.config.secret.clone(),
            online_tx,
            last_report: parking_lot::Mutex::new(tokio::time::Instant::now()),
        });

        let router = Router::new()
            .route("/", post(report_handler))
            .with_state(Arc::clone(&shared));
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(TransportError::from)?;
        info!(addr = %addr, api_url = %self.config.api_url, "HTTP duplex ready, waiting for the first report");
        monitor.mark_opening();
        monitor.mark_open();

        let server_token = io.shutdown.child_token();
        let server_shutdown = server_token.clone();
        let server = tokio::spawn(async move {
            let serve = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await });
            if let Err(err) = serve.await {
                warn!(error = %err, "HTTP report server error");
            }
        });

        // Offline watchdog: no report within max_interval flips the link
        // offline until the next report arrives.
        let watchdog_token = io.shutdown.child_token();
        let watchdog = self.config.max_interval.map(|interval| {
            let shared = Arc::clone(&shared);
            let token = watchdog_token.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(interval) => {}
                    }
                    if shared.last_report.lock().elapsed() <= interval {
                        continue;
                    }
                    let was_online = shared.online_tx.send_replace(false);
                    if was_online {
                        warn!("no report from the endpoint, marking it offline");
                        shared.monitor.mark_relinking();
                        shared.sink.on_link(LinkEvent::Dropped).await;
                        shared.monitor.mark_open();
                    }
                }
            })
        });

        let sink = Arc::clone(&io.sink);
        let shutdown = io.shutdown.clone();
        let actions = &mut io.actions;

        let result = loop {
            let action = tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                action = actions.recv() => match action {
                    Some(action) => action,
                    None => break Ok(()),
                },
            };

            // Actions wait for the endpoint to be online.
            if !*online_rx.borrow() {
                debug!(action = %action.ty, "holding action until the endpoint is online");
                tokio::select! {
                    _ = shutdown.cancelled() => break Ok(()),
                    res = online_rx.wait_for(|online| *online) => {
                        if res.is_err() {
                            break Ok(());
                        }
                    }
                }
            }

            sink.presend(&action).await;
            pacer.pace().await;
            match post_action(&client, &self.config.api_url, &action).await {
                Ok(Some(echo)) => sink.on_frame(InboundFrame::Echo(echo)).await,
                Ok(None) => {}
                Err(err) => {
                    if self.config.allow_reconnect {
                        warn!(error = %err, "endpoint unreachable, waiting for it to come back");
                        shared.online_tx.send_replace(false);
                        monitor.mark_relinking();
                        sink.on_link(LinkEvent::Dropped).await;
                        monitor.mark_open();
                    } else {
                        break Err(err);
                    }
                }
            }
            pacer.mark_sent();
        };

        server_token.cancel();
        watchdog_token.cancel();
        let _ = server.await;
        if let Some(watchdog) = watchdog {
            let _ = watchdog.await;
        }
        monitor.mark_closed();
        sink.on_link(LinkEvent::Closed).await;
        result
    }
}

/// POSTs one action; returns the echo response when one was requested.
async fn post_action(
    client: &reqwest::Client,
    api_url: &str,
    action: &Action,
) -> TransportResult<Option<EchoResponse>> {
    let url = format!("{}/{}", api_url.trim_end_matches('/'), action.ty);
    trace!(action = %action.ty, url = %url, "posting action");
    let resp = client
        .post(&url)
        .json(&action.params)
        .send()
        .await
        .map_err(|err| TransportError::SendFailed(err.to_string()))?;

    let status = resp.status();
    if status == 401 || status == 403 {
        return Err(TransportError::AuthRejected {
            url: api_url.to_string(),
        });
    }
    if !status.is_success() {
        return Err(TransportError::SendFailed(format!(
            "endpoint answered HTTP {status}"
        )));
    }

    let Some(echo) = &action.echo else {
        return Ok(None);
    };
    let raw: serde_json::Value = resp
        .json()
        .await
        .map_err(|err| TransportError::SendFailed(err.to_string()))?;
    match EchoResponse::parse(raw) {
        Ok(mut parsed) => {
            // HTTP responses carry no echo field; the correlation is the
            // request/response pairing itself.
            parsed.id = Some(echo.clone());
            Ok(Some(parsed))
        }
        Err(err) => {
            warn!(action = %action.ty, error = %err, "undecodable API response dropped");
            Ok(None)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_verification() {
        // HMAC-SHA1("secret", "hello") =
        // 5112055c05f944f85755efc5cd8970e194e9f45b
        let body = b"hello";
        let good = "sha1=5112055c05f944f85755efc5cd8970e194e9f45b";
        assert!(verify_signature("secret", body, good));
        assert!(verify_signature(
            "secret",
            body,
            "sha1=5112055C05F944F85755EFC5CD8970E194E9F45B"
        ));
        assert!(!verify_signature("secret", body, "sha1=deadbeef"));
        assert!(!verify_signature("other", body, good));
        assert!(!verify_signature("secret", body, "md5=abc"));
        assert!(!verify_signature("secret", body, ""));
    }
}
