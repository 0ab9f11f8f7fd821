//! The bot supervisor.
//!
//! `Bot` wires the transport, dispatcher, responder and hook bus together
//! and owns the run/close lifecycle:
//!
//! 1. `run()`: emit `Loaded`, bring up the connector, emit `Started`, then
//!    drive the connector until shutdown or a fatal transport error.
//! 2. `close()`: emit `BeforeClose` (joined), then cancel the transport;
//!    `run()` finishes by draining in-flight handler bodies within the
//!    grace period, failing outstanding echoes, and emitting `BeforeStop`
//!    (joined).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use solder_core::Action;
use solder_framework::{
    BotLife, BotServices, Dispatcher, HookArg, Plugin, Responder,
};
use solder_transport::{
    Connector, ConnectorIo, DuplexHttpConn, ForwardWsConn, FrameSink, HttpConfig, InboundFrame,
    LinkEvent, ReverseWsConn, WsClientConfig, WsServerConfig,
};

use crate::config::{BotConfig, ConnectionConfig};
use crate::error::{RuntimeError, RuntimeResult};
use crate::registry;

/// One logical bot: a single process owns it, a single transport feeds it.
pub struct Bot {
    config: BotConfig,
    services: Arc<BotServices>,
    dispatcher: Arc<Dispatcher>,
    actions_rx: Option<mpsc::Receiver<Action>>,
    shutdown: CancellationToken,
    closing: Arc<AtomicBool>,
}

impl Bot {
    /// Creates a bot from its configuration, claiming the bot name.
    pub fn new(config: BotConfig) -> RuntimeResult<Self> {
        registry::claim(&config.name)?;
        let (responder, actions_rx) = Responder::channel();
        let services = BotServices::new(responder);
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&services)));
        Ok(Self {
            config,
            services,
            dispatcher,
            actions_rx: Some(actions_rx),
            shutdown: CancellationToken::new(),
            closing: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The bot's name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The shared services (sessions, responder, hooks, IPC).
    pub fn services(&self) -> &Arc<BotServices> {
        &self.services
    }

    /// The dispatcher, for registering handlers directly.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Loads a plugin. Must happen before `run`.
    pub fn load_plugin(&self, plugin: Plugin) -> RuntimeResult<()> {
        plugin.load(&self.dispatcher, &self.services)?;
        Ok(())
    }

    /// A handle that closes the bot gracefully when invoked.
    pub fn closer(&self) -> BotCloser {
        BotCloser {
            services: Arc::clone(&self.services),
            shutdown: self.shutdown.clone(),
            closing: Arc::clone(&self.closing),
        }
    }

    /// Runs the bot until it is closed or the transport fails fatally.
    pub async fn run(&mut self) -> RuntimeResult<()> {
        let actions = self.actions_rx.take().ok_or(RuntimeError::AlreadyRan)?;

        self.services
            .hooks
            .emit_wait(BotLife::Loaded, HookArg::None)
            .await;

        let connector = build_connector(&self.config.connection);
        let sink: Arc<dyn FrameSink> = Arc::new(BotSink {
            services: Arc::clone(&self.services),
            dispatcher: Arc::clone(&self.dispatcher),
        });

        self.services.responder.set_ready();
        self.dispatcher.set_ready();
        self.services
            .hooks
            .emit_wait(BotLife::Started, HookArg::None)
            .await;
        info!(bot = %self.config.name, "bot started");

        let io = ConnectorIo {
            sink,
            actions,
            shutdown: self.shutdown.clone(),
        };
        let result = connector.run(io).await;

        // The transport may have died on its own; the close hook still
        // runs exactly once, before teardown.
        if !self.closing.swap(true, Ordering::SeqCst) {
            self.services
                .hooks
                .emit_wait(BotLife::BeforeClose, HookArg::None)
                .await;
        }

        // Drain in-flight handler bodies with a grace period.
        self.services.tasks.close();
        let drained =
            tokio::time::timeout(self.config.shutdown_grace, self.services.tasks.wait()).await;
        if drained.is_err() {
            warn!(
                bot = %self.config.name,
                grace = ?self.config.shutdown_grace,
                "handler bodies still running after the grace period, abandoning them"
            );
        }

        self.services.responder.fail_all_pending();
        self.services
            .hooks
            .emit_wait(BotLife::BeforeStop, HookArg::None)
            .await;
        self.services.hooks.drain().await;
        info!(bot = %self.config.name, "bot stopped");

        result.map_err(Into::into)
    }
}

impl Drop for Bot {
    fn drop(&mut self) {
        registry::release(&self.config.name);
        self.shutdown.cancel();
    }
}

/// Gracefully closes a running bot from another task.
#[derive(Clone)]
pub struct BotCloser {
    services: Arc<BotServices>,
    shutdown: CancellationToken,
    closing: Arc<AtomicBool>,
}

impl BotCloser {
    /// Emits `BeforeClose` (joined) and cancels the transport. The bot's
    /// `run` call then finishes the teardown.
    pub async fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        self.services
            .hooks
            .emit_wait(BotLife::BeforeClose, HookArg::None)
            .await;
        self.shutdown.cancel();
    }
}

fn build_connector(config: &ConnectionConfig) -> Box<dyn Connector> {
    match config {
        ConnectionConfig::WsClient {
            url,
            access_token,
            max_retry,
            retry_delay,
            cd_time,
        } => Box::new(ForwardWsConn::new(WsClientConfig {
            url: url.clone(),
            access_token: access_token.clone(),
            max_retry: *max_retry,
            retry_delay: *retry_delay,
            cd_time: *cd_time,
        })),
        ConnectionConfig::WsServer {
            host,
            port,
            cd_time,
            allow_reconnect,
        } => {
            let mut ws = WsServerConfig::new(host.clone(), *port);
            ws.cd_time = *cd_time;
            ws.allow_reconnect = *allow_reconnect;
            Box::new(ReverseWsConn::new(ws))
        }
        ConnectionConfig::Http {
            api_url,
            host,
            port,
            cd_time,
            secret,
            max_interval,
            allow_reconnect,
        } => {
            let mut http = HttpConfig::new(api_url.clone(), host.clone(), *port);
            http.cd_time = *cd_time;
            http.secret = secret.clone();
            http.max_interval = *max_interval;
            http.allow_reconnect = *allow_reconnect;
            Box::new(DuplexHttpConn::new(http))
        }
    }
}

// ============================================================================
// Frame sink glue
// ============================================================================

/// Routes transport frames into the dispatcher and responder, and link
/// transitions into lifecycle hooks.
struct BotSink {
    services: Arc<BotServices>,
    dispatcher: Arc<Dispatcher>,
}

#[async_trait]
impl FrameSink for BotSink {
    async fn on_frame(&self, frame: InboundFrame) {
        match frame {
            InboundFrame::Event(event) => self.dispatcher.dispatch(event).await,
            InboundFrame::Echo(resp) => self.services.responder.respond(resp),
        }
    }

    async fn presend(&self, action: &Action) {
        self.services
            .hooks
            .emit_wait(BotLife::ActionPresend, HookArg::Action(action.clone()))
            .await;
    }

    async fn on_link(&self, event: LinkEvent) {
        match event {
            LinkEvent::FirstLinked => {
                self.services
                    .hooks
                    .emit_wait(BotLife::FirstConnected, HookArg::None)
                    .await;
            }
            LinkEvent::Relinked => {
                self.services
                    .hooks
                    .emit_wait(BotLife::Reconnected, HookArg::None)
                    .await;
                self.services
                    .hooks
                    .emit_wait(BotLife::Restarted, HookArg::None)
                    .await;
            }
            LinkEvent::Dropped | LinkEvent::Closed => {
                self.services.responder.fail_all_pending();
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str) -> BotConfig {
        BotConfig {
            name: name.to_string(),
            ..BotConfig::default()
        }
    }

    #[tokio::test]
    async fn test_duplicate_name_refused() {
        let _bot = Bot::new(config("dup-bot")).unwrap();
        assert!(matches!(
            Bot::new(config("dup-bot")),
            Err(RuntimeError::DuplicateBot(_))
        ));
    }

    #[tokio::test]
    async fn test_name_released_on_drop() {
        {
            let _bot = Bot::new(config("transient-bot")).unwrap();
        }
        let _bot = Bot::new(config("transient-bot")).unwrap();
    }

    #[tokio::test]
    async fn test_plugin_loads_before_run() {
        let bot = Bot::new(config("plugin-bot")).unwrap();
        let plugin = Plugin::builder("probe")
            .handler(
                solder_framework::Handler::on_message()
                    .executor(|_| async {})
                    .build()
                    .unwrap(),
            )
            .build();
        bot.load_plugin(plugin).unwrap();
        assert_eq!(
            bot.dispatcher().handler_count(solder_core::EventType::Message),
            1
        );
    }
}
