//! The shared link state machine and inbound frame classification.
//!
//! Every connector tracks its link through the same states:
//!
//! ```text
//! Closed → Opening → Open → Linked ⇄ Relinking → Open
//!                                             ↘ Closed
//! ```
//!
//! `Linked` is entered only after the first successful peer I/O, which is
//! also what distinguishes a first link from a relink.

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use solder_core::{EchoResponse, Event};

use crate::InboundFrame;

/// The link lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No connection and none being made.
    Closed,
    /// A connection attempt is in progress.
    Opening,
    /// A connection exists but no peer I/O has succeeded yet.
    Open,
    /// Peer I/O has succeeded; the link is live.
    Linked,
    /// The link dropped and a new connection is being made.
    Relinking,
}

/// Link transitions surfaced to the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// First successful peer I/O of this connector's lifetime.
    FirstLinked,
    /// Peer I/O resumed after a drop.
    Relinked,
    /// The link went down; the connector will try to bring it back.
    Dropped,
    /// The connector is done; no relink will follow.
    Closed,
}

/// Tracks one connector's link state.
#[derive(Debug, Default)]
pub struct LinkMonitor {
    inner: Mutex<MonitorInner>,
}

#[derive(Debug)]
struct MonitorInner {
    state: LinkState,
    linked_before: bool,
}

impl Default for MonitorInner {
    fn default() -> Self {
        Self {
            state: LinkState::Closed,
            linked_before: false,
        }
    }
}

impl LinkMonitor {
    /// A monitor in the `Closed` state.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current state.
    pub fn state(&self) -> LinkState {
        self.inner.lock().state
    }

    /// A connection attempt started.
    pub fn mark_opening(&self) {
        self.inner.lock().state = LinkState::Opening;
    }

    /// A connection exists; waiting for peer I/O.
    pub fn mark_open(&self) {
        self.inner.lock().state = LinkState::Open;
    }

    /// Peer I/O succeeded. On the transition into `Linked`, returns which
    /// kind of link this was; returns `None` while already linked.
    pub fn mark_peer_io(&self) -> Option<LinkEvent> {
        let mut inner = self.inner.lock();
        if inner.state == LinkState::Linked {
            return None;
        }
        inner.state = LinkState::Linked;
        if inner.linked_before {
            Some(LinkEvent::Relinked)
        } else {
            inner.linked_before = true;
            Some(LinkEvent::FirstLinked)
        }
    }

    /// The link dropped; a reconnect will be attempted.
    pub fn mark_relinking(&self) {
        self.inner.lock().state = LinkState::Relinking;
    }

    /// The connector is done.
    pub fn mark_closed(&self) {
        self.inner.lock().state = LinkState::Closed;
    }
}

// ============================================================================
// Frame classification
// ============================================================================

/// Classifies one raw inbound frame.
///
/// Frames with a `post_type` are events; frames with a `retcode` are echo
/// responses. Malformed JSON and unrecognized shapes are logged and
/// dropped (`None`), never fatal.
pub fn classify_frame(raw: &str) -> Option<InboundFrame> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(err) => {
            warn!(error = %err, "malformed inbound frame dropped");
            return None;
        }
    };

    if value.get("post_type").is_some() {
        match Event::parse(value) {
            Ok(event) => Some(InboundFrame::Event(event)),
            Err(err) => {
                warn!(error = %err, "undecodable event frame dropped");
                None
            }
        }
    } else if value.get("retcode").is_some() {
        match EchoResponse::parse(value) {
            Ok(resp) => Some(InboundFrame::Echo(resp)),
            Err(err) => {
                warn!(error = %err, "undecodable echo frame dropped");
                None
            }
        }
    } else {
        debug!("inbound frame is neither event nor echo, dropped");
        None
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_link_then_relink() {
        let monitor = LinkMonitor::new();
        assert_eq!(monitor.state(), LinkState::Closed);

        monitor.mark_opening();
        monitor.mark_open();
        assert_eq!(monitor.state(), LinkState::Open);

        assert_eq!(monitor.mark_peer_io(), Some(LinkEvent::FirstLinked));
        assert_eq!(monitor.state(), LinkState::Linked);
        // Further I/O on a linked connection is not a transition.
        assert_eq!(monitor.mark_peer_io(), None);

        monitor.mark_relinking();
        monitor.mark_open();
        assert_eq!(monitor.mark_peer_io(), Some(LinkEvent::Relinked));
    }

    #[test]
    fn test_classify_event_frame() {
        let frame = r#"{"post_type":"message","message_type":"private","time":1,
            "self_id":10,"message_id":1,"user_id":2,"message":"hi"}"#;
        match classify_frame(frame) {
            Some(InboundFrame::Event(event)) => assert_eq!(event.text(), "hi"),
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_echo_frame() {
        let frame = r#"{"status":"ok","retcode":0,"echo":"abc","data":{"message_id":42}}"#;
        match classify_frame(frame) {
            Some(InboundFrame::Echo(resp)) => {
                assert_eq!(resp.id.as_deref(), Some("abc"));
                assert!(resp.is_ok());
            }
            other => panic!("expected echo, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_garbage_dropped() {
        assert!(classify_frame("not json").is_none());
        assert!(classify_frame(r#"{"neither":true}"#).is_none());
        // An event frame missing its required fields is dropped, not fatal.
        assert!(classify_frame(r#"{"post_type":"message"}"#).is_none());
    }
}
