//! The action/echo correlator.
//!
//! The responder sits between handler-issued actions and the transport.
//! Fire-and-forget actions go straight to the outbound queue; actions that
//! want a response get a fresh echo id and a pending entry, and the handle
//! returned to the caller resolves when the transport delivers the matching
//! echo frame.
//!
//! Backpressure is synchronous: the outbound queue is bounded (soft cap
//! [`OUTPUT_CAP`]) and the pending table is bounded ([`ECHO_CAP`]); hitting
//! either cap rejects the action immediately instead of queueing further.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use solder_core::{Action, ActionError, ActionResult, EchoResponse};

use crate::signal::Signal;

/// Soft cap on the outbound action queue.
pub const OUTPUT_CAP: usize = 100;

/// Soft cap on the pending-echo table.
pub const ECHO_CAP: usize = 256;

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<EchoResponse>>>>;

tokio::task_local! {
    static REQUIRE_ECHO: bool;
}

/// Runs a future with the require-echo flag set: every action issued inside
/// is forced to request a response, even through `take_action`.
pub async fn with_require_echo<F: Future>(fut: F) -> F::Output {
    REQUIRE_ECHO.scope(true, fut).await
}

fn require_echo_set() -> bool {
    REQUIRE_ECHO.try_with(|v| *v).unwrap_or(false)
}

// ============================================================================
// Responder
// ============================================================================

/// Routes outbound actions to the transport and inbound echoes back to the
/// waiting handles.
pub struct Responder {
    out_tx: mpsc::Sender<Action>,
    pending: PendingMap,
    ready: Signal,
}

impl Responder {
    /// Creates a responder writing into the transport's action queue.
    ///
    /// The channel should be bounded at [`OUTPUT_CAP`]; overflow surfaces
    /// as [`ActionError::OutputOverflow`].
    pub fn new(out_tx: mpsc::Sender<Action>) -> Self {
        Self {
            out_tx,
            pending: Arc::new(Mutex::new(HashMap::new())),
            ready: Signal::new(false),
        }
    }

    /// Creates a responder together with its outbound queue receiver.
    pub fn channel() -> (Self, mpsc::Receiver<Action>) {
        let (tx, rx) = mpsc::channel(OUTPUT_CAP);
        (Self::new(tx), rx)
    }

    /// Opens the responder for traffic. Actions issued before this block.
    pub fn set_ready(&self) {
        self.ready.set();
    }

    /// Number of actions currently awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    fn push(&self, action: Action) -> ActionResult<()> {
        self.out_tx.try_send(action).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => ActionError::OutputOverflow,
            mpsc::error::TrySendError::Closed(_) => ActionError::LinkClosed,
        })
    }

    /// Sends an action without waiting for a response.
    ///
    /// If the task-local require-echo flag is set (see
    /// [`with_require_echo`]), the action is upgraded to an awaited one.
    pub async fn take_action(&self, action: Action) -> ActionResult<ActionHandle> {
        if require_echo_set() || action.needs_echo() {
            return self.take_action_wait(action).await;
        }
        self.ready.wait().await;
        self.push(action.clone())?;
        Ok(ActionHandle::finished(action))
    }

    /// Sends an action and returns a handle resolving on the matching echo.
    ///
    /// The pending entry is registered before the action is pushed so a
    /// fast response can never race past its waiter.
    pub async fn take_action_wait(&self, action: Action) -> ActionResult<ActionHandle> {
        self.ready.wait().await;
        let action = action.want_echo();
        let echo = action
            .echo
            .clone()
            .ok_or(ActionError::NoEchoRequested)?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if pending.len() >= ECHO_CAP {
                return Err(ActionError::EchoOverflow);
            }
            pending.insert(echo.clone(), tx);
        }

        if let Err(err) = self.push(action.clone()) {
            self.pending.lock().remove(&echo);
            return Err(err);
        }
        debug!(action = %action.ty, echo = %echo, "action awaiting response");
        Ok(ActionHandle::waiting(
            action,
            echo,
            rx,
            Arc::clone(&self.pending),
        ))
    }

    /// Routes an inbound echo frame to its waiting handle.
    ///
    /// Echoes without an id, and echoes whose waiter is gone (timed out or
    /// cancelled), are dropped.
    pub fn respond(&self, resp: EchoResponse) {
        let Some(id) = resp.id.clone() else {
            debug!("response without an echo id dropped");
            return;
        };
        match self.pending.lock().remove(&id) {
            Some(tx) => {
                let _ = tx.send(resp);
            }
            None => warn!(echo = %id, "response matches no waiting action, dropped"),
        }
    }

    /// Fails every outstanding handle with a link-closed error. Called when
    /// the transport goes down.
    pub fn fail_all_pending(&self) {
        let mut pending = self.pending.lock();
        let count = pending.len();
        if count > 0 {
            debug!(count, "failing pending actions, link closed");
            pending.clear();
        }
    }
}

// ============================================================================
// Action handles
// ============================================================================

enum HandleState {
    Finished,
    Waiting {
        echo: String,
        rx: oneshot::Receiver<EchoResponse>,
        pending: PendingMap,
    },
}

/// The caller-side handle for an issued action.
///
/// Fire-and-forget actions return a finished handle; awaited actions return
/// a handle whose [`resp`](ActionHandle::resp) resolves on the echo frame.
/// Dropping a waiting handle withdraws its pending entry, so an abandoned
/// await never leaks table space.
pub struct ActionHandle {
    action: Action,
    state: Option<HandleState>,
}

impl ActionHandle {
    fn finished(action: Action) -> Self {
        Self {
            action,
            state: Some(HandleState::Finished),
        }
    }

    fn waiting(
        action: Action,
        echo: String,
        rx: oneshot::Receiver<EchoResponse>,
        pending: PendingMap,
    ) -> Self {
        Self {
            action,
            state: Some(HandleState::Waiting { echo, rx, pending }),
        }
    }

    /// The action this handle was issued for.
    pub fn action(&self) -> &Action {
        &self.action
    }

    /// Whether this handle will resolve with a response.
    pub fn expects_resp(&self) -> bool {
        matches!(self.state, Some(HandleState::Waiting { .. }))
    }

    /// Awaits the response.
    ///
    /// # Errors
    ///
    /// [`ActionError::NoEchoRequested`] for fire-and-forget handles;
    /// [`ActionError::LinkClosed`] when the transport went down first.
    pub async fn resp(mut self) -> ActionResult<EchoResponse> {
        match self.state.take() {
            Some(HandleState::Waiting { rx, .. }) => {
                rx.await.map_err(|_| ActionError::LinkClosed)
            }
            _ => Err(ActionError::NoEchoRequested),
        }
    }

    /// Awaits the response with a deadline. On timeout the pending entry is
    /// withdrawn and [`ActionError::EchoTimeout`] is returned.
    pub async fn resp_timeout(mut self, timeout: Duration) -> ActionResult<EchoResponse> {
        match self.state.take() {
            Some(HandleState::Waiting { echo, rx, pending }) => {
                match tokio::time::timeout(timeout, rx).await {
                    Ok(Ok(resp)) => Ok(resp),
                    Ok(Err(_)) => Err(ActionError::LinkClosed),
                    Err(_) => {
                        pending.lock().remove(&echo);
                        Err(ActionError::EchoTimeout)
                    }
                }
            }
            _ => Err(ActionError::NoEchoRequested),
        }
    }
}

impl Drop for ActionHandle {
    fn drop(&mut self) {
        if let Some(HandleState::Waiting { echo, pending, .. }) = self.state.take() {
            pending.lock().remove(&echo);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn responder() -> (Responder, mpsc::Receiver<Action>) {
        let (responder, rx) = Responder::channel();
        responder.set_ready();
        (responder, rx)
    }

    #[tokio::test]
    async fn test_fire_and_forget() {
        let (responder, mut rx) = responder();
        let handle = responder
            .take_action(Action::new("send_msg", json!({"x": 1})))
            .await
            .unwrap();
        assert!(!handle.expects_resp());
        let sent = rx.recv().await.unwrap();
        assert!(sent.echo.is_none());
        assert!(matches!(
            handle.resp().await,
            Err(ActionError::NoEchoRequested)
        ));
    }

    #[tokio::test]
    async fn test_echo_round_trip() {
        let (responder, mut rx) = responder();
        let handle = responder
            .take_action_wait(Action::new("send_msg", json!({})))
            .await
            .unwrap();
        let sent = rx.recv().await.unwrap();
        let echo = sent.echo.clone().unwrap();

        // Another pending entry must not be disturbed.
        let other = responder
            .take_action_wait(Action::new("get_msg", json!({})))
            .await
            .unwrap();
        assert_eq!(responder.pending_count(), 2);

        responder.respond(
            EchoResponse::parse(json!({
                "status": "ok", "retcode": 0, "echo": echo,
                "data": {"message_id": 42}
            }))
            .unwrap(),
        );

        let resp = handle.resp().await.unwrap();
        assert!(resp.is_ok());
        assert_eq!(resp.data["message_id"], 42);
        assert_eq!(responder.pending_count(), 1);
        drop(other);
        assert_eq!(responder.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unmatched_echo_dropped() {
        let (responder, _rx) = responder();
        // No waiter registered: dropped without effect.
        responder.respond(
            EchoResponse::parse(json!({"status": "ok", "retcode": 0, "echo": "nope"})).unwrap(),
        );
        assert_eq!(responder.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_timeout_withdraws_entry() {
        let (responder, _rx) = responder();
        let handle = responder
            .take_action_wait(Action::new("get_msg", json!({})))
            .await
            .unwrap();
        let res = handle.resp_timeout(Duration::from_millis(10)).await;
        assert!(matches!(res, Err(ActionError::EchoTimeout)));
        assert_eq!(responder.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_link_close_fails_outstanding() {
        let (responder, _rx) = responder();
        let handle = responder
            .take_action_wait(Action::new("get_msg", json!({})))
            .await
            .unwrap();
        responder.fail_all_pending();
        assert!(matches!(handle.resp().await, Err(ActionError::LinkClosed)));
    }

    #[tokio::test]
    async fn test_output_overflow_rejects() {
        let (tx, _rx) = mpsc::channel(1);
        let responder = Responder::new(tx);
        responder.set_ready();

        responder
            .take_action(Action::new("a", json!({})))
            .await
            .unwrap();
        let res = responder.take_action(Action::new("b", json!({}))).await;
        assert!(matches!(res, Err(ActionError::OutputOverflow)));
    }

    #[tokio::test]
    async fn test_echo_cap_rejects() {
        let (tx, _rx) = mpsc::channel(ECHO_CAP + 8);
        let responder = Responder::new(tx);
        responder.set_ready();

        let mut handles = Vec::new();
        for _ in 0..ECHO_CAP {
            handles.push(
                responder
                    .take_action_wait(Action::new("a", json!({})))
                    .await
                    .unwrap(),
            );
        }
        let res = responder.take_action_wait(Action::new("b", json!({}))).await;
        assert!(matches!(res, Err(ActionError::EchoOverflow)));
    }

    #[tokio::test]
    async fn test_require_echo_scope() {
        let (responder, mut rx) = responder();
        let handle = with_require_echo(async {
            responder
                .take_action(Action::new("send_msg", json!({})))
                .await
                .unwrap()
        })
        .await;
        assert!(handle.expects_resp());
        assert!(rx.recv().await.unwrap().echo.is_some());
    }
}
