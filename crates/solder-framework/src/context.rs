//! The handler-facing context.
//!
//! Ambient state is passed explicitly: every handler body receives a
//! [`Ctx`] bundling its session with the bot's shared services, and every
//! action-constructing call goes through it so the trigger back-reference
//! and the expired-session guard apply uniformly.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::task::TaskTracker;

use solder_core::{Action, ActionError, ActionResult, Event, Message, ops};

use crate::error::SessionResult;
use crate::hook::HookBus;
use crate::ipc::{PluginBus, PluginStore};
use crate::parser::ParseArgs;
use crate::responder::{ActionHandle, Responder};
use crate::session::{Session, SessionManager};

/// The shared service wiring handed to every handler.
pub struct BotServices {
    /// Session storage and lifecycle.
    pub sessions: Arc<SessionManager>,
    /// Action/echo correlation.
    pub responder: Arc<Responder>,
    /// Lifecycle hook bus.
    pub hooks: Arc<HookBus>,
    /// Cross-plugin signals.
    pub signals: Arc<PluginBus>,
    /// Cross-plugin shared objects.
    pub shares: Arc<PluginStore>,
    /// Tracks spawned handler bodies for graceful drain.
    pub tasks: TaskTracker,
}

impl BotServices {
    /// Wires a fresh service set around a responder.
    pub fn new(responder: Responder) -> Arc<Self> {
        Arc::new(Self {
            sessions: Arc::new(SessionManager::new()),
            responder: Arc::new(responder),
            hooks: Arc::new(HookBus::new()),
            signals: Arc::new(PluginBus::new()),
            shares: Arc::new(PluginStore::new()),
            tasks: TaskTracker::new(),
        })
    }
}

/// What a handler body gets to work with.
#[derive(Clone)]
pub struct Ctx {
    session: Arc<Session>,
    services: Arc<BotServices>,
}

impl Ctx {
    pub(crate) fn new(session: Arc<Session>, services: Arc<BotServices>) -> Self {
        Self { session, services }
    }

    /// The session this body runs in.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// The bot's shared services.
    pub fn services(&self) -> &Arc<BotServices> {
        &self.services
    }

    /// The current event of the session.
    pub fn event(&self) -> Arc<Event> {
        self.session.event()
    }

    /// Plain text of the current event (empty for non-message events).
    pub fn text(&self) -> String {
        self.event().text().to_string()
    }

    /// The latest parser output bound to the session.
    pub fn args(&self) -> Option<ParseArgs> {
        self.session.args()
    }

    /// Suspends the session until a matching event wakes it.
    pub async fn pause(&self) -> SessionResult<()> {
        self.services.sessions.hup(&self.session, None).await
    }

    /// Suspends the session with a timeout.
    pub async fn pause_for(&self, timeout: Duration) -> SessionResult<()> {
        self.services
            .sessions
            .hup(&self.session, Some(timeout))
            .await
    }

    /// Destroys the session now. The body keeps running, but no further
    /// action can be issued from it.
    pub fn dispose(&self) {
        self.services.sessions.expire(&self.session);
    }

    async fn issue(&self, mut action: Action, wait: bool) -> ActionResult<ActionHandle> {
        if self.session.is_expired() {
            return Err(ActionError::SessionExpired);
        }
        action.fill_trigger(self.event());
        if wait {
            self.services.responder.take_action_wait(action).await
        } else {
            self.services.responder.take_action(action).await
        }
    }

    /// Issues an action without waiting for its response.
    pub async fn call(&self, action: Action) -> ActionResult<ActionHandle> {
        self.issue(action, false).await
    }

    /// Issues an action and returns a handle resolving on its response.
    pub async fn call_wait(&self, action: Action) -> ActionResult<ActionHandle> {
        self.issue(action, true).await
    }

    /// Replies into the conversation of the current (message) event.
    pub async fn send(&self, message: impl Into<Message>) -> ActionResult<ActionHandle> {
        let action =
            ops::send_msg(&self.event(), &message.into()).ok_or(ActionError::NoReplyTarget)?;
        self.issue(action, false).await
    }

    /// Replies and waits for the send result.
    pub async fn send_wait(&self, message: impl Into<Message>) -> ActionResult<ActionHandle> {
        let action =
            ops::send_msg(&self.event(), &message.into()).ok_or(ActionError::NoReplyTarget)?;
        self.issue(action, true).await
    }
}
