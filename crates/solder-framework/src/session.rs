//! Sessions and the session manager.
//!
//! A session is the state of one logical conversation, identified by a
//! handler's [`SessionRule`](crate::rule::SessionRule) applied to events.
//! Per handler the manager owns an active set, a parked (suspended) set, a
//! work lock serializing acquisition against attachment, an attach lock
//! serializing attachment attempts, and a one-shot deadlock flag.
//!
//! The deadlock flag exists because [`SessionManager::get`] may legitimately
//! wait, while holding the work lock, for a suspended session's free signal
//! — which only fires after something wakes the parked session. The waking
//! path ([`SessionManager::try_attach`]) contends for the same work lock, so
//! `get` publishes "I'm stuck, attach without the lock" through the flag.
//!
//! # State invariants
//!
//! - A session is suspended iff its state is [`SessionState::Suspended`];
//!   in that state it is neither expired nor free.
//! - A session sits in either the active set or the parked set of its
//!   handler, never both; moves between them happen under the work lock or
//!   the deadlock-flag path.
//! - Expired sessions have an empty store, sit in no set, and refuse new
//!   operations.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, trace};

use solder_core::Event;

use crate::error::{SessionError, SessionResult};
use crate::parser::ParseArgs;
use crate::rule::SessionRule;
use crate::signal::Signal;

/// Identifies one registered handler; keys the per-handler session spaces.
pub type HandlerId = u64;

/// The session facet of a handler's configuration.
///
/// Carried separately from the full handler so the manager never needs to
/// see executors or match configuration.
#[derive(Clone)]
pub struct SessionProfile {
    /// The owning handler.
    pub id: HandlerId,
    /// Equivalence rule; `None` means every event gets a one-shot session.
    pub rule: Option<Arc<dyn SessionRule>>,
    /// Whether acquisition waits for a busy session instead of bailing.
    pub conflict_wait: bool,
    /// Whether sessions outlive the handler body.
    pub hold: bool,
}

impl SessionProfile {
    /// A profile with no rule: one-shot sessions only.
    pub fn one_shot(id: HandlerId) -> Self {
        Self {
            id,
            rule: None,
            conflict_wait: false,
            hold: false,
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// Running/suspended lifecycle of a session.
///
/// The awake/hup twin signals of the conversation model are one bit of
/// state; transitions are broadcast through a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// The session is attached to (or available for) a handler body.
    Running,
    /// The session is parked, waiting to be woken by an attaching event.
    Suspended,
}

/// Per-conversation state.
pub struct Session {
    event: Mutex<Arc<Event>>,
    args: Mutex<Option<ParseArgs>>,
    store: Mutex<HashMap<String, Value>>,
    free: Signal,
    state: watch::Sender<SessionState>,
    expired: AtomicBool,
    space_tag: Option<HandlerId>,
}

impl Session {
    fn new(event: Arc<Event>, space_tag: Option<HandlerId>) -> Arc<Self> {
        let (state, _) = watch::channel(SessionState::Running);
        Arc::new(Self {
            event: Mutex::new(event),
            args: Mutex::new(None),
            store: Mutex::new(HashMap::new()),
            free: Signal::new(true),
            state,
            expired: AtomicBool::new(false),
            space_tag,
        })
    }

    /// Creates a one-shot session outside any session space.
    pub fn one_shot(event: Arc<Event>) -> Arc<Self> {
        Self::new(event, None)
    }

    /// The most recent event bound to this session.
    pub fn event(&self) -> Arc<Event> {
        self.event.lock().clone()
    }

    pub(crate) fn bind_event(&self, event: Arc<Event>) {
        *self.event.lock() = event;
    }

    /// The most recent parser output bound to this session.
    pub fn args(&self) -> Option<ParseArgs> {
        self.args.lock().clone()
    }

    pub(crate) fn set_args(&self, args: Option<ParseArgs>) {
        *self.args.lock() = args;
    }

    /// Reads a value from the session store.
    pub fn store_get(&self, key: &str) -> Option<Value> {
        self.store.lock().get(key).cloned()
    }

    /// Writes a value into the session store.
    pub fn store_set(&self, key: impl Into<String>, val: Value) {
        self.store.lock().insert(key.into(), val);
    }

    /// Removes a value from the session store.
    pub fn store_remove(&self, key: &str) -> Option<Value> {
        self.store.lock().remove(key)
    }

    /// Number of entries in the session store.
    pub fn store_len(&self) -> usize {
        self.store.lock().len()
    }

    /// Whether the session is expired.
    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::SeqCst)
    }

    /// Whether the session is currently suspended.
    pub fn is_suspended(&self) -> bool {
        *self.state.borrow() == SessionState::Suspended
    }

    /// Whether the session is free (no handler body holds it).
    pub fn is_free(&self) -> bool {
        self.free.is_set()
    }

    /// The handler whose session space owns this session, if any.
    pub fn space_tag(&self) -> Option<HandlerId> {
        self.space_tag
    }

    async fn wait_suspended(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| *s == SessionState::Suspended).await;
    }

    async fn wait_running(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| *s == SessionState::Running).await;
    }
}

// ============================================================================
// Session spaces
// ============================================================================

/// The per-handler storage and locking triple.
struct SessionSpace {
    active: Mutex<Vec<Arc<Session>>>,
    parked: Mutex<Vec<Arc<Session>>>,
    work_lock: tokio::sync::Mutex<()>,
    attach_lock: tokio::sync::Mutex<()>,
    deadlock_flag: Signal,
}

impl SessionSpace {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            active: Mutex::new(Vec::new()),
            parked: Mutex::new(Vec::new()),
            work_lock: tokio::sync::Mutex::new(()),
            attach_lock: tokio::sync::Mutex::new(()),
            deadlock_flag: Signal::new(false),
        })
    }
}

fn remove_session(list: &Mutex<Vec<Arc<Session>>>, session: &Arc<Session>) -> bool {
    let mut guard = list.lock();
    match guard.iter().position(|s| Arc::ptr_eq(s, session)) {
        Some(idx) => {
            guard.swap_remove(idx);
            true
        }
        None => false,
    }
}

// ============================================================================
// Session manager
// ============================================================================

/// Owns every handler's session space.
#[derive(Default)]
pub struct SessionManager {
    spaces: RwLock<HashMap<HandlerId, Arc<SessionSpace>>>,
}

impl SessionManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the session space for a handler. Called once at handler
    /// registration time.
    pub fn register(&self, handler: HandlerId) {
        self.spaces
            .write()
            .entry(handler)
            .or_insert_with(SessionSpace::new);
    }

    fn space(&self, handler: HandlerId) -> SessionResult<Arc<SessionSpace>> {
        self.spaces
            .read()
            .get(&handler)
            .cloned()
            .ok_or(SessionError::UnknownSpace(handler))
    }

    /// Number of sessions currently active for a handler.
    pub fn active_count(&self, handler: HandlerId) -> usize {
        self.space(handler)
            .map(|space| space.active.lock().len())
            .unwrap_or(0)
    }

    /// Number of sessions currently parked for a handler.
    pub fn parked_count(&self, handler: HandlerId) -> usize {
        self.space(handler)
            .map(|space| space.parked.lock().len())
            .unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Acquisition
    // ------------------------------------------------------------------

    /// Acquires the session for `event` under `profile`.
    ///
    /// Without a rule this always constructs a fresh one-shot session. With
    /// a rule, the active set is scanned under the work lock; a free match
    /// is rebound to the event, a busy match is waited for (or refused when
    /// `conflict_wait` is off, in which case `Ok(None)` is returned).
    ///
    /// The returned session has its free signal cleared: the caller owns it
    /// until [`recycle`](Self::recycle).
    pub async fn get(
        &self,
        event: &Arc<Event>,
        profile: &SessionProfile,
    ) -> SessionResult<Option<Arc<Session>>> {
        let Some(rule) = profile.rule.clone() else {
            let session = Session::one_shot(event.clone());
            session.free.clear();
            return Ok(Some(session));
        };

        let space = self.space(profile.id)?;
        // The free signal may only flip under the work lock; attachment
        // contends for the same lock through try_attach.
        let _work = space.work_lock.lock().await;
        let session = self
            .get_on_rule(event, profile, &space, rule.as_ref())
            .await?;
        if let Some(session) = &session {
            session.free.clear();
        }
        Ok(session)
    }

    async fn get_on_rule(
        &self,
        event: &Arc<Event>,
        profile: &SessionProfile,
        space: &Arc<SessionSpace>,
        rule: &dyn SessionRule,
    ) -> SessionResult<Option<Arc<Session>>> {
        let found = {
            let active = space.active.lock();
            active
                .iter()
                .find(|s| !s.is_expired() && rule.compare(&s.event(), event))
                .cloned()
        };

        let Some(session) = found else {
            return Ok(Some(self.make_in_space(event, profile.id, space)));
        };

        if session.free.is_set() {
            session.bind_event(event.clone());
            return Ok(Some(session));
        }
        if !profile.conflict_wait {
            return Ok(None);
        }

        // The session is busy and we chose to wait: block until it frees
        // up or suspends, whichever comes first.
        tokio::select! {
            _ = session.free.wait() => {}
            _ = session.wait_suspended() => {}
        }
        if session.is_suspended() {
            // We hold the work lock and the session can only free up after
            // something wakes it — publish the deadlock flag so try_attach
            // can proceed on its lock-free path, then wait it out.
            debug!(handler = profile.id, "session wait deadlock, raising flag");
            space.deadlock_flag.set();
            session.free.wait().await;
        }

        // The session may have expired while we waited, but it is free and
        // not suspended now. An expired one is simply replaced.
        if session.is_expired() {
            Ok(Some(self.make_in_space(event, profile.id, space)))
        } else {
            session.bind_event(event.clone());
            Ok(Some(session))
        }
    }

    fn make_in_space(
        &self,
        event: &Arc<Event>,
        handler: HandlerId,
        space: &Arc<SessionSpace>,
    ) -> Arc<Session> {
        let session = Session::new(event.clone(), Some(handler));
        space.active.lock().push(session.clone());
        trace!(handler, "new session created");
        session
    }

    // ------------------------------------------------------------------
    // Suspension and waking
    // ------------------------------------------------------------------

    /// Suspends a session until a matching event attaches to it.
    ///
    /// On timeout the session is forcibly woken and
    /// [`SessionError::Timeout`] is returned.
    pub async fn hup(
        &self,
        session: &Arc<Session>,
        timeout: Option<Duration>,
    ) -> SessionResult<()> {
        let Some(tag) = session.space_tag else {
            return Err(SessionError::OneShot);
        };
        if session.is_expired() {
            return Err(SessionError::Expired);
        }
        if timeout == Some(Duration::ZERO) {
            return Err(SessionError::ZeroTimeout);
        }
        let space = self.space(tag)?;

        session.set_args(None);
        remove_session(&space.active, session);
        space.parked.lock().push(session.clone());
        session.state.send_replace(SessionState::Suspended);
        debug!(handler = tag, "session suspended");

        match timeout {
            None => {
                session.wait_running().await;
                Ok(())
            }
            Some(timeout) => {
                let woke = tokio::time::timeout(timeout, session.wait_running())
                    .await
                    .is_ok();
                if woke {
                    Ok(())
                } else {
                    self.rouse(session)?;
                    Err(SessionError::Timeout)
                }
            }
        }
    }

    /// Wakes a parked session: moves it back to the active set and flips it
    /// to running.
    pub fn rouse(&self, session: &Arc<Session>) -> SessionResult<()> {
        let Some(tag) = session.space_tag else {
            return Err(SessionError::OneShot);
        };
        let space = self.space(tag)?;
        if remove_session(&space.parked, session) {
            space.active.lock().push(session.clone());
        }
        session.state.send_replace(SessionState::Running);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Attachment
    // ------------------------------------------------------------------

    /// Attaches an incoming event to a parked session of this handler, if
    /// one matches. Returns true when the event was absorbed (the session
    /// was woken with the event bound).
    ///
    /// Races the handler's deadlock flag against the work lock: whichever
    /// fires first guards the attachment. Winning the flag means a `get`
    /// call is parked on the work lock waiting for exactly this wake-up, so
    /// attachment must proceed without taking it.
    pub async fn try_attach(
        &self,
        event: &Arc<Event>,
        profile: &SessionProfile,
    ) -> SessionResult<bool> {
        let Some(rule) = profile.rule.clone() else {
            return Ok(false);
        };
        let space = self.space(profile.id)?;
        let _attach = space.attach_lock.lock().await;

        tokio::select! {
            _ = space.deadlock_flag.wait() => {
                let res = self.attach(event, &space, rule.as_ref());
                // The flag is one-shot: consumed by the attach attempt it
                // unblocked, regardless of whether a session matched.
                space.deadlock_flag.clear();
                Ok(res)
            }
            guard = space.work_lock.lock() => {
                let res = self.attach(event, &space, rule.as_ref());
                drop(guard);
                Ok(res)
            }
        }
    }

    /// The attachment critical section. Only called from `try_attach`.
    fn attach(&self, event: &Arc<Event>, space: &Arc<SessionSpace>, rule: &dyn SessionRule) -> bool {
        let found = {
            let parked = space.parked.lock();
            // Suspension guarantees the session is not expired, so no
            // expiry check here.
            parked
                .iter()
                .find(|s| rule.compare(&s.event(), event))
                .cloned()
        };
        match found {
            Some(session) => {
                session.bind_event(event.clone());
                if remove_session(&space.parked, &session) {
                    space.active.lock().push(session.clone());
                }
                session.state.send_replace(SessionState::Running);
                true
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Recycling
    // ------------------------------------------------------------------

    /// Marks a session expired: clears its store and removes it from its
    /// active set. Idempotent.
    pub fn expire(&self, session: &Arc<Session>) {
        if session.expired.swap(true, Ordering::SeqCst) {
            return;
        }
        session.store.lock().clear();
        if let Some(tag) = session.space_tag {
            if let Ok(space) = self.space(tag) {
                remove_session(&space.active, session);
            }
        }
    }

    /// Releases a session after its handler body returned. Sets the free
    /// signal; unless `alive`, the session is expired.
    pub fn recycle(&self, session: &Arc<Session>, alive: bool) {
        session.free.set();
        if !alive {
            self.expire(session);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::AttrRule;
    use serde_json::json;

    fn msg(group: i64, user: i64, text: &str) -> Arc<Event> {
        Arc::new(
            Event::parse(json!({
                "post_type": "message", "message_type": "group",
                "time": 1, "self_id": 10, "message_id": 1,
                "user_id": user, "group_id": group,
                "sender": {"user_id": user},
                "message": text
            }))
            .unwrap(),
        )
    }

    fn profile(id: HandlerId, conflict_wait: bool) -> SessionProfile {
        SessionProfile {
            id,
            rule: Some(Arc::new(AttrRule::new(["group_id", "sender.user_id"]))),
            conflict_wait,
            hold: false,
        }
    }

    #[tokio::test]
    async fn test_one_shot_sessions() {
        let mgr = SessionManager::new();
        let profile = SessionProfile::one_shot(1);
        let s1 = mgr.get(&msg(1, 2, "a"), &profile).await.unwrap().unwrap();
        let s2 = mgr.get(&msg(1, 2, "b"), &profile).await.unwrap().unwrap();
        assert!(!Arc::ptr_eq(&s1, &s2));
        assert!(!s1.is_free());
        assert!(s1.space_tag().is_none());
    }

    #[tokio::test]
    async fn test_same_conversation_reuses_session() {
        let mgr = SessionManager::new();
        mgr.register(1);
        let profile = profile(1, false);

        let s1 = mgr.get(&msg(300, 20, "a"), &profile).await.unwrap().unwrap();
        mgr.recycle(&s1, true);

        let s2 = mgr.get(&msg(300, 20, "b"), &profile).await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&s1, &s2));
        assert_eq!(s2.event().text(), "b");

        let s3 = mgr.get(&msg(300, 21, "c"), &profile).await.unwrap().unwrap();
        assert!(!Arc::ptr_eq(&s1, &s3));
        assert_eq!(mgr.active_count(1), 2);
    }

    #[tokio::test]
    async fn test_conflict_without_wait_returns_none() {
        let mgr = SessionManager::new();
        mgr.register(1);
        let profile = profile(1, false);

        let _busy = mgr.get(&msg(300, 20, "a"), &profile).await.unwrap().unwrap();
        let second = mgr.get(&msg(300, 20, "b"), &profile).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_conflict_wait_serializes_events() {
        let mgr = Arc::new(SessionManager::new());
        mgr.register(1);
        let profile = profile(1, true);

        let s1 = mgr.get(&msg(300, 20, "a"), &profile).await.unwrap().unwrap();

        let waiter = {
            let mgr = Arc::clone(&mgr);
            let profile = profile.clone();
            tokio::spawn(async move { mgr.get(&msg(300, 20, "b"), &profile).await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        // Finishing the first body lets the second event in; the session
        // was recycled dead, so the waiter gets a fresh one.
        mgr.recycle(&s1, false);
        let s2 = waiter.await.unwrap().unwrap().unwrap();
        assert!(!Arc::ptr_eq(&s1, &s2));
        assert!(s1.is_expired());
    }

    #[tokio::test]
    async fn test_hup_requires_rule_and_liveness() {
        let mgr = SessionManager::new();
        let one_shot = Session::one_shot(msg(1, 2, "x"));
        assert!(matches!(
            mgr.hup(&one_shot, None).await,
            Err(SessionError::OneShot)
        ));

        mgr.register(1);
        let profile = profile(1, false);
        let session = mgr.get(&msg(300, 20, "a"), &profile).await.unwrap().unwrap();
        mgr.recycle(&session, false);
        assert!(matches!(
            mgr.hup(&session, None).await,
            Err(SessionError::Expired)
        ));
    }

    #[tokio::test]
    async fn test_hup_timeout_rouses() {
        let mgr = Arc::new(SessionManager::new());
        mgr.register(1);
        let profile = profile(1, false);
        let session = mgr.get(&msg(300, 20, "a"), &profile).await.unwrap().unwrap();

        let res = mgr.hup(&session, Some(Duration::from_millis(20))).await;
        assert!(matches!(res, Err(SessionError::Timeout)));
        assert!(!session.is_suspended());
        assert_eq!(mgr.parked_count(1), 0);
        assert_eq!(mgr.active_count(1), 1);
    }

    #[tokio::test]
    async fn test_attach_wakes_parked_session() {
        let mgr = Arc::new(SessionManager::new());
        mgr.register(1);
        let profile = profile(1, false);
        let session = mgr.get(&msg(300, 20, "first"), &profile).await.unwrap().unwrap();

        let hupper = {
            let mgr = Arc::clone(&mgr);
            let session = session.clone();
            tokio::spawn(async move { mgr.hup(&session, None).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(mgr.parked_count(1), 1);

        // A matching event is absorbed by the parked session.
        let attached = mgr.try_attach(&msg(300, 20, "second"), &profile).await.unwrap();
        assert!(attached);
        hupper.await.unwrap().unwrap();
        assert_eq!(session.event().text(), "second");
        assert!(!session.is_suspended());
        assert_eq!(mgr.active_count(1), 1);

        // A non-matching event is not.
        let attached = mgr.try_attach(&msg(300, 99, "other"), &profile).await.unwrap();
        assert!(!attached);
    }

    #[tokio::test]
    async fn test_expire_clears_store() {
        let mgr = SessionManager::new();
        mgr.register(1);
        let profile = profile(1, false);
        let session = mgr.get(&msg(300, 20, "a"), &profile).await.unwrap().unwrap();
        session.store_set("k", json!(1));

        mgr.expire(&session);
        assert!(session.is_expired());
        assert_eq!(session.store_len(), 0);
        assert_eq!(mgr.active_count(1), 0);
    }

    #[tokio::test]
    async fn test_deadlock_flag_breaks_cycle() {
        // A get() call waiting on a suspended session publishes the
        // deadlock flag; try_attach takes the flag path, wakes the session,
        // and the get() call completes.
        let mgr = Arc::new(SessionManager::new());
        mgr.register(1);
        let profile = profile(1, true);

        let session = mgr.get(&msg(300, 20, "first"), &profile).await.unwrap().unwrap();

        // This get() finds the session busy and starts waiting on it while
        // holding the work lock.
        let getter = {
            let mgr = Arc::clone(&mgr);
            let profile = profile.clone();
            tokio::spawn(async move { mgr.get(&msg(300, 20, "second"), &profile).await })
        };
        tokio::task::yield_now().await;
        assert!(!getter.is_finished());

        // The handler body suspends the session; the waiting get() observes
        // the transition and raises the deadlock flag.
        let hupper = {
            let mgr = Arc::clone(&mgr);
            let session = session.clone();
            tokio::spawn(async move { mgr.hup(&session, None).await })
        };
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        // try_attach must get through despite the held work lock.
        let attached = tokio::time::timeout(
            Duration::from_secs(1),
            mgr.try_attach(&msg(300, 20, "third"), &profile),
        )
        .await
        .expect("try_attach deadlocked")
        .unwrap();
        assert!(attached);
        hupper.await.unwrap().unwrap();

        // The woken body finishes, freeing the session for the waiter.
        mgr.recycle(&session, true);
        let got = tokio::time::timeout(Duration::from_secs(1), getter)
            .await
            .expect("get() deadlocked")
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(&got, &session));
        assert_eq!(got.event().text(), "second");
    }
}
