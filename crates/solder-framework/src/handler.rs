//! Handler descriptors and the per-handler execution path.
//!
//! A handler is frozen at registration: its channel, match configuration,
//! priority, blocking and one-shot flags, and session policy never change
//! afterwards. The dispatcher walks handlers per event; each handler
//! pre-processes the event in a temporary session (checker chain, then for
//! message events matcher or parser), and on acceptance spawns its body
//! concurrently.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, error};

use solder_core::{Event, EventType};

use crate::checker::Checker;
use crate::context::{BotServices, Ctx};
use crate::error::{HandlerError, HandlerResult};
use crate::matcher::Matcher;
use crate::parser::{CmdParser, ParseArgs};
use crate::rule::SessionRule;
use crate::session::{HandlerId, Session, SessionProfile};

/// Flag-bag namespace for memoized parse results.
const PARSE_MEMO_NS: &str = "solder.parse";

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

/// The type-erased handler body.
pub type Executor = Arc<dyn Fn(Ctx) -> BoxFuture<'static, ()> + Send + Sync>;

/// A registered event handler.
pub struct Handler {
    id: HandlerId,
    channel: EventType,
    executor: Executor,
    checker: Option<Arc<dyn Checker>>,
    matcher: Option<Arc<dyn Matcher>>,
    parser: Option<Arc<CmdParser>>,
    priority: i32,
    block: bool,
    temp: bool,
    direct_rouse: bool,
    conflict_cb: Option<Executor>,
    profile: SessionProfile,
    valid: AtomicBool,
    run_lock: tokio::sync::Mutex<()>,
}

impl Handler {
    /// Starts building a handler on the given channel.
    pub fn on(channel: EventType) -> HandlerBuilder {
        HandlerBuilder::new(channel)
    }

    /// Shorthand for a message-channel builder.
    pub fn on_message() -> HandlerBuilder {
        Self::on(EventType::Message)
    }

    /// Shorthand for a notice-channel builder.
    pub fn on_notice() -> HandlerBuilder {
        Self::on(EventType::Notice)
    }

    /// Shorthand for a request-channel builder.
    pub fn on_request() -> HandlerBuilder {
        Self::on(EventType::Request)
    }

    /// Shorthand for a meta-channel builder.
    pub fn on_meta() -> HandlerBuilder {
        Self::on(EventType::Meta)
    }

    /// This handler's id.
    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// The channel this handler subscribes to.
    pub fn channel(&self) -> EventType {
        self.channel
    }

    /// Dispatch priority; higher runs earlier.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Whether a successful run blocks lower-priority handlers.
    pub fn is_blocking(&self) -> bool {
        self.block
    }

    /// Whether this handler wakes suspended sessions without re-checking
    /// its own filters.
    pub fn direct_rouse(&self) -> bool {
        self.direct_rouse
    }

    /// The session facet of this handler's configuration.
    pub fn profile(&self) -> &SessionProfile {
        &self.profile
    }

    /// Whether this handler can still fire.
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Pre-processing
    // ------------------------------------------------------------------

    /// Runs the match layer: for message events the matcher or parser.
    ///
    /// Returns `None` for rejection, `Some(args)` for acceptance (`args`
    /// carries parser output when a parser is configured).
    fn match_text(&self, event: &Arc<Event>) -> Option<Option<(String, ParseArgs)>> {
        if let Some(matcher) = &self.matcher {
            return matcher.is_match(event.text()).then_some(None);
        }
        let Some(parser) = &self.parser else {
            return Some(None);
        };

        // Parse output is memoized on the event so several handlers
        // sharing one token configuration parse it once.
        let group: Option<std::collections::HashMap<String, ParseArgs>> = match event
            .flags()
            .get(PARSE_MEMO_NS, parser.id())
        {
            Some(memo) => serde_json::from_value(memo).ok()?,
            None => {
                let group = parser.parse(event.text());
                let memo = serde_json::to_value(&group).unwrap_or(Value::Null);
                event.flags().mark(PARSE_MEMO_NS, parser.id(), memo);
                group
            }
        };
        parser.test(group.as_ref()).map(Some)
    }

    /// Full admission check for an event: match layer, checker chain, and
    /// argument formatting, run against a temporary session.
    async fn pre_process(&self, event: &Arc<Event>) -> Option<Option<ParseArgs>> {
        let matched = self.match_text(event)?;

        if let Some(checker) = &self.checker {
            if !checker.check(event).await {
                return None;
            }
        }

        match (matched, &self.parser) {
            (Some((cmd_name, mut args)), Some(parser)) => {
                if !parser.format(&cmd_name, &mut args).await {
                    return None;
                }
                Some(Some(args))
            }
            _ => Some(None),
        }
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Decides whether this handler takes the event, spawning its body if
    /// so. Returns the decision so the dispatcher can apply blocking.
    pub(crate) async fn evoke(
        self: Arc<Self>,
        event: Arc<Event>,
        services: Arc<BotServices>,
    ) -> bool {
        if !self.is_valid() {
            return false;
        }
        let Some(args) = self.pre_process(&event).await else {
            return false;
        };
        debug!(handler = self.id, event = %event.describe(), "handler accepted event");

        if !self.temp {
            Self::spawn_run(self, event, services, args);
            return true;
        }
        // One-shot handlers invalidate atomically with their first spawn,
        // so a second concurrent event can never fire them again.
        let gate = self.run_lock.lock().await;
        if self.valid.swap(false, Ordering::SeqCst) {
            drop(gate);
            Self::spawn_run(self, event, services, args);
            true
        } else {
            false
        }
    }

    fn spawn_run(
        handler: Arc<Self>,
        event: Arc<Event>,
        services: Arc<BotServices>,
        args: Option<ParseArgs>,
    ) {
        let tracker = services.tasks.clone();
        tracker.spawn(async move {
            handler.run(event, services, args).await;
        });
    }

    async fn run(
        self: Arc<Self>,
        event: Arc<Event>,
        services: Arc<BotServices>,
        args: Option<ParseArgs>,
    ) {
        // Without direct_rouse, a parked session absorbs the event here
        // instead of a fresh body run.
        if !self.direct_rouse {
            match services.sessions.try_attach(&event, &self.profile).await {
                Ok(true) => return,
                Ok(false) => {}
                Err(err) => {
                    error!(handler = self.id, error = %err, "session attach failed");
                    return;
                }
            }
        }

        let session = match services.sessions.get(&event, &self.profile).await {
            Ok(session) => session,
            Err(err) => {
                error!(handler = self.id, error = %err, "session acquisition failed");
                return;
            }
        };

        let Some(session) = session else {
            // Conflict without waiting: run the conflict callback in a
            // temporary session, if one is configured.
            if let Some(cb) = &self.conflict_cb {
                let ctx = Ctx::new(Session::one_shot(event), Arc::clone(&services));
                if let Err(err) = tokio::spawn(cb(ctx)).await {
                    error!(handler = self.id, error = %err, "conflict callback failed");
                }
            }
            return;
        };

        if self.parser.is_some() {
            session.set_args(args);
        }

        let ctx = Ctx::new(Arc::clone(&session), Arc::clone(&services));
        // The body runs as its own task so a panic is contained to it.
        if let Err(err) = tokio::spawn((self.executor)(ctx)).await {
            error!(
                handler = self.id,
                event = %event.describe(),
                error = %err,
                "handler body failed, abandoning it"
            );
        }

        // The body may have been torn down while suspended; force-wake so
        // the session never leaks in the parked set.
        if session.is_suspended() {
            let _ = services.sessions.rouse(&session);
        }
        services.sessions.recycle(&session, self.profile.hold);
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builds a [`Handler`].
pub struct HandlerBuilder {
    channel: EventType,
    executor: Option<Executor>,
    checker: Option<Arc<dyn Checker>>,
    matcher: Option<Arc<dyn Matcher>>,
    parser: Option<Arc<CmdParser>>,
    priority: i32,
    block: bool,
    temp: bool,
    session_rule: Option<Arc<dyn SessionRule>>,
    hold: bool,
    direct_rouse: bool,
    conflict_wait: bool,
    conflict_cb: Option<Executor>,
}

impl HandlerBuilder {
    fn new(channel: EventType) -> Self {
        Self {
            channel,
            executor: None,
            checker: None,
            matcher: None,
            parser: None,
            priority: 0,
            block: false,
            temp: false,
            session_rule: None,
            hold: false,
            direct_rouse: false,
            conflict_wait: false,
            conflict_cb: None,
        }
    }

    /// Sets the handler body.
    pub fn executor<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Ctx) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.executor = Some(Arc::new(move |ctx| Box::pin(f(ctx))));
        self
    }

    /// Sets the checker chain.
    pub fn checker(mut self, checker: impl Checker + 'static) -> Self {
        self.checker = Some(Arc::new(checker));
        self
    }

    /// Sets the text matcher (message channel only).
    pub fn matcher(mut self, matcher: impl Matcher + 'static) -> Self {
        self.matcher = Some(Arc::new(matcher));
        self
    }

    /// Sets the command parser (message channel only).
    pub fn parser(mut self, parser: CmdParser) -> Self {
        self.parser = Some(Arc::new(parser));
        self
    }

    /// Sets the dispatch priority (higher runs first; default 0).
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// A successful run blocks lower-priority handlers on the channel.
    pub fn block(mut self, block: bool) -> Self {
        self.block = block;
        self
    }

    /// The handler is consumed by its first successful run.
    pub fn temp(mut self, temp: bool) -> Self {
        self.temp = temp;
        self
    }

    /// Sets the session rule identifying "the same conversation".
    pub fn session_rule(mut self, rule: impl SessionRule + 'static) -> Self {
        self.session_rule = Some(Arc::new(rule));
        self
    }

    /// Sessions survive past the body's return.
    pub fn hold(mut self, hold: bool) -> Self {
        self.hold = hold;
        self
    }

    /// Suspended sessions are woken by any rule-matching event without
    /// re-running this handler's filters.
    pub fn direct_rouse(mut self, direct_rouse: bool) -> Self {
        self.direct_rouse = direct_rouse;
        self
    }

    /// Events for a busy session wait instead of being refused.
    pub fn conflict_wait(mut self, conflict_wait: bool) -> Self {
        self.conflict_wait = conflict_wait;
        self
    }

    /// Callback run (in a temporary session) when an event is refused
    /// because its session is busy.
    pub fn conflict_cb<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Ctx) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.conflict_cb = Some(Arc::new(move |ctx| Box::pin(f(ctx))));
        self
    }

    /// Validates and freezes the handler.
    pub fn build(self) -> HandlerResult<Handler> {
        let executor = self.executor.ok_or(HandlerError::MissingExecutor)?;
        if self.matcher.is_some() && self.parser.is_some() {
            return Err(HandlerError::MatcherAndParser);
        }
        if (self.matcher.is_some() || self.parser.is_some())
            && self.channel != EventType::Message
        {
            return Err(HandlerError::TextOnNonMessage);
        }
        if self.session_rule.is_none()
            && (self.hold || self.direct_rouse || self.conflict_wait || self.conflict_cb.is_some())
        {
            return Err(HandlerError::OptionsRequireRule);
        }
        if self.conflict_wait && self.conflict_cb.is_some() {
            return Err(HandlerError::ConflictWaitWithCallback);
        }

        let id = NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed);
        Ok(Handler {
            id,
            channel: self.channel,
            executor,
            checker: self.checker,
            matcher: self.matcher,
            parser: self.parser,
            priority: self.priority,
            block: self.block,
            temp: self.temp,
            direct_rouse: self.direct_rouse,
            conflict_cb: self.conflict_cb,
            profile: SessionProfile {
                id,
                rule: self.session_rule,
                conflict_wait: self.conflict_wait,
                hold: self.hold,
            },
            valid: AtomicBool::new(true),
            run_lock: tokio::sync::Mutex::new(()),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::StartMatcher;
    use crate::parser::CmdParser;
    use crate::rule::AttrRule;

    fn noop() -> impl Fn(Ctx) -> futures::future::Ready<()> + Send + Sync + 'static {
        |_ctx| futures::future::ready(())
    }

    #[test]
    fn test_builder_validation() {
        // Matcher and parser are exclusive.
        let res = Handler::on_message()
            .executor(|_| async {})
            .matcher(StartMatcher::single("!"))
            .parser(CmdParser::new(["."], [" "], vec!["x".into()]).unwrap())
            .build();
        assert!(matches!(res, Err(HandlerError::MatcherAndParser)));

        // Text matching is message-only.
        let res = Handler::on_notice()
            .executor(|_| async {})
            .matcher(StartMatcher::single("!"))
            .build();
        assert!(matches!(res, Err(HandlerError::TextOnNonMessage)));

        // Session options need a rule.
        let res = Handler::on_message()
            .executor(|_| async {})
            .hold(true)
            .build();
        assert!(matches!(res, Err(HandlerError::OptionsRequireRule)));

        // conflict_wait and a conflict callback are exclusive.
        let res = Handler::on_message()
            .executor(|_| async {})
            .session_rule(AttrRule::new(["user_id"]))
            .conflict_wait(true)
            .conflict_cb(noop())
            .build();
        assert!(matches!(res, Err(HandlerError::ConflictWaitWithCallback)));

        // A well-formed handler builds.
        let handler = Handler::on_message()
            .executor(|_| async {})
            .session_rule(AttrRule::new(["user_id"]))
            .conflict_wait(true)
            .priority(10)
            .block(true)
            .build()
            .unwrap();
        assert!(handler.is_blocking());
        assert_eq!(handler.priority(), 10);
        assert!(handler.is_valid());
    }

    #[test]
    fn test_ids_unique() {
        let a = Handler::on_meta().executor(|_| async {}).build().unwrap();
        let b = Handler::on_meta().executor(|_| async {}).build().unwrap();
        assert_ne!(a.id(), b.id());
    }
}
