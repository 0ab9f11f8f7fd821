//! The channelized event dispatcher.
//!
//! Handlers are grouped by channel (event variant) and kept sorted by
//! descending priority. Dispatching an event emits the `EventBuilt` hook,
//! then walks the channel's handlers on one task, maintaining the `permit`
//! watermark: once a blocking handler fires, handlers below its priority
//! are skipped for this event. Handler *bodies* run concurrently; only the
//! decision to run them is serialized, which is what makes the blocking
//! semantics race-free.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{Level, debug, span, warn};

use solder_core::{Event, EventType};

use crate::context::BotServices;
use crate::handler::Handler;
use crate::hook::{BotLife, HookArg};
use crate::signal::Signal;

/// The central dispatcher.
pub struct Dispatcher {
    services: Arc<BotServices>,
    channels: RwLock<HashMap<EventType, Vec<Arc<Handler>>>>,
    ready: Signal,
}

impl Dispatcher {
    /// Creates a dispatcher over the given services.
    pub fn new(services: Arc<BotServices>) -> Self {
        Self {
            services,
            channels: RwLock::new(HashMap::new()),
            ready: Signal::new(false),
        }
    }

    /// The services this dispatcher wires handlers to.
    pub fn services(&self) -> &Arc<BotServices> {
        &self.services
    }

    /// Registers a handler into its channel, keeping the channel sorted by
    /// descending priority (stable for equal priorities).
    pub fn register(&self, handler: Handler) -> Arc<Handler> {
        let handler = Arc::new(handler);
        self.services.sessions.register(handler.id());
        let mut channels = self.channels.write();
        let channel = channels.entry(handler.channel()).or_default();
        let at = channel
            .iter()
            .position(|h| h.priority() < handler.priority())
            .unwrap_or(channel.len());
        channel.insert(at, Arc::clone(&handler));
        debug!(
            handler = handler.id(),
            channel = ?handler.channel(),
            priority = handler.priority(),
            "handler registered"
        );
        handler
    }

    /// Number of handlers on a channel.
    pub fn handler_count(&self, channel: EventType) -> usize {
        self.channels.read().get(&channel).map_or(0, Vec::len)
    }

    /// Opens the dispatcher for events. Events arriving earlier wait.
    pub fn set_ready(&self) {
        self.ready.set();
    }

    /// Dispatches one inbound event.
    ///
    /// Emits the `EventBuilt` hook (joined), then spawns the channel
    /// broadcast. Returns once the broadcast task is spawned; bodies run
    /// on their own tasks.
    pub async fn dispatch(&self, event: Event) {
        self.ready.wait().await;
        let event = Arc::new(event);
        let span = span!(Level::DEBUG, "dispatch", event = %event.describe());
        let _enter = span.enter();

        self.services
            .hooks
            .emit_wait(BotLife::EventBuilt, HookArg::Event(Arc::clone(&event)))
            .await;

        let channel = event.event_type();
        if channel == EventType::Other {
            debug!(event = %event.describe(), "no channel for event, dropped");
            return;
        }
        let handlers = self
            .channels
            .read()
            .get(&channel)
            .cloned()
            .unwrap_or_default();
        if handlers.is_empty() {
            return;
        }

        let services = Arc::clone(&self.services);
        self.services.tasks.spawn(async move {
            broadcast(handlers, event, services).await;
        });
    }

    /// Dispatches and waits until the broadcast walk finished deciding
    /// (bodies may still be running). Exposed for the supervisor's tests
    /// and orderly shutdown.
    pub async fn dispatch_and_walk(&self, event: Event) {
        self.ready.wait().await;
        let event = Arc::new(event);
        self.services
            .hooks
            .emit_wait(BotLife::EventBuilt, HookArg::Event(Arc::clone(&event)))
            .await;
        let channel = event.event_type();
        let handlers = self
            .channels
            .read()
            .get(&channel)
            .cloned()
            .unwrap_or_default();
        broadcast(handlers, event, Arc::clone(&self.services)).await;
    }
}

/// Walks one channel's handlers in priority order for one event.
async fn broadcast(handlers: Vec<Arc<Handler>>, event: Arc<Event>, services: Arc<BotServices>) {
    let mut permit = i32::MIN;
    for handler in handlers {
        if handler.priority() < permit {
            continue;
        }

        if handler.direct_rouse() {
            match services.sessions.try_attach(&event, handler.profile()).await {
                Ok(true) => {
                    // The event was absorbed by a parked session; blocking
                    // still applies.
                    if handler.is_blocking() && handler.priority() > permit {
                        permit = handler.priority();
                    }
                    continue;
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(handler = handler.id(), error = %err, "direct rouse failed");
                }
            }
        }

        let taken = Arc::clone(&handler)
            .evoke(Arc::clone(&event), Arc::clone(&services))
            .await;
        if !taken {
            continue;
        }
        if handler.is_blocking() && handler.priority() > permit {
            permit = handler.priority();
            debug!(permit, "blocking handler raised the permit watermark");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Ctx;
    use crate::responder::Responder;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn services() -> Arc<BotServices> {
        let (responder, _rx) = Responder::channel();
        responder.set_ready();
        // Keep the queue receiver alive for the test duration.
        std::mem::forget(_rx);
        BotServices::new(responder)
    }

    fn private_msg(user: i64, text: &str) -> Event {
        Event::parse(json!({
            "post_type": "message", "message_type": "private",
            "time": 1, "self_id": 10, "message_id": 1,
            "user_id": user,
            "sender": {"user_id": user},
            "message": text
        }))
        .unwrap()
    }

    fn counting_handler(
        counter: &Arc<AtomicUsize>,
    ) -> impl Fn(Ctx) -> futures::future::BoxFuture<'static, ()> + Send + Sync + 'static {
        let counter = Arc::clone(counter);
        move |_ctx| {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        }
    }

    async fn settle(services: &Arc<BotServices>) {
        // Give spawned bodies a chance to run.
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        let _ = services;
    }

    #[tokio::test]
    async fn test_priority_block_skips_lower() {
        let services = services();
        let dispatcher = Dispatcher::new(Arc::clone(&services));
        dispatcher.set_ready();

        let high = Arc::new(AtomicUsize::new(0));
        let low = Arc::new(AtomicUsize::new(0));

        dispatcher.register(
            Handler::on_message()
                .executor(counting_handler(&high))
                .priority(100)
                .block(true)
                .build()
                .unwrap(),
        );
        dispatcher.register(
            Handler::on_message()
                .executor(counting_handler(&low))
                .priority(50)
                .build()
                .unwrap(),
        );

        dispatcher.dispatch_and_walk(private_msg(1, "hi")).await;
        settle(&services).await;

        assert_eq!(high.load(Ordering::SeqCst), 1);
        assert_eq!(low.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_non_blocking_all_run() {
        let services = services();
        let dispatcher = Dispatcher::new(Arc::clone(&services));
        dispatcher.set_ready();

        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        dispatcher.register(
            Handler::on_message()
                .executor(counting_handler(&a))
                .priority(100)
                .build()
                .unwrap(),
        );
        dispatcher.register(
            Handler::on_message()
                .executor(counting_handler(&b))
                .priority(50)
                .build()
                .unwrap(),
        );

        dispatcher.dispatch_and_walk(private_msg(1, "hi")).await;
        settle(&services).await;

        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejected_handler_does_not_block() {
        let services = services();
        let dispatcher = Dispatcher::new(Arc::clone(&services));
        dispatcher.set_ready();

        let picky = Arc::new(AtomicUsize::new(0));
        let fallback = Arc::new(AtomicUsize::new(0));
        dispatcher.register(
            Handler::on_message()
                .executor(counting_handler(&picky))
                .matcher(crate::matcher::StartMatcher::single("!"))
                .priority(100)
                .block(true)
                .build()
                .unwrap(),
        );
        dispatcher.register(
            Handler::on_message()
                .executor(counting_handler(&fallback))
                .priority(50)
                .build()
                .unwrap(),
        );

        dispatcher.dispatch_and_walk(private_msg(1, "plain")).await;
        settle(&services).await;

        assert_eq!(picky.load(Ordering::SeqCst), 0);
        assert_eq!(fallback.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_temp_handler_fires_once() {
        let services = services();
        let dispatcher = Dispatcher::new(Arc::clone(&services));
        dispatcher.set_ready();

        let count = Arc::new(AtomicUsize::new(0));
        dispatcher.register(
            Handler::on_message()
                .executor(counting_handler(&count))
                .temp(true)
                .build()
                .unwrap(),
        );

        dispatcher.dispatch_and_walk(private_msg(1, "first")).await;
        dispatcher.dispatch_and_walk(private_msg(1, "second")).await;
        settle(&services).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_event_built_hook_runs_before_handlers() {
        let services = services();
        let dispatcher = Dispatcher::new(Arc::clone(&services));
        dispatcher.set_ready();

        let seen = Arc::new(AtomicUsize::new(0));
        {
            let seen = Arc::clone(&seen);
            services.hooks.on(BotLife::EventBuilt, move |arg| {
                let seen = Arc::clone(&seen);
                async move {
                    if let HookArg::Event(event) = arg {
                        assert_eq!(event.text(), "hi");
                    }
                    seen.fetch_add(1, Ordering::SeqCst);
                }
            });
        }

        dispatcher.dispatch_and_walk(private_msg(1, "hi")).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_channel_partition() {
        let services = services();
        let dispatcher = Dispatcher::new(Arc::clone(&services));
        dispatcher.set_ready();

        let msg_count = Arc::new(AtomicUsize::new(0));
        dispatcher.register(
            Handler::on_message()
                .executor(counting_handler(&msg_count))
                .build()
                .unwrap(),
        );

        let notice = Event::parse(json!({
            "post_type": "notice", "notice_type": "friend_add",
            "time": 1, "self_id": 10, "user_id": 20
        }))
        .unwrap();
        dispatcher.dispatch_and_walk(notice).await;
        settle(&services).await;

        assert_eq!(msg_count.load(Ordering::SeqCst), 0);
    }
}
