//! Typed events built from inbound OneBot v11 frames.
//!
//! Every inbound event frame carries a `post_type` discriminant; [`Event`]
//! resolves it (plus the per-variant subtype field) into a closed sum of
//! typed records. The raw JSON map is kept on the event for opaque
//! passthrough, and unknown `post_type`s are preserved as [`EventKind::Other`]
//! rather than dropped.
//!
//! Events are immutable after construction and shared between handlers via
//! `Arc`; the only mutable part is the [`FlagStore`] flag-bag.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{ProtocolError, ProtocolResult};
use crate::flag::FlagStore;
use crate::message::Message;

// ============================================================================
// Event Type Classification
// ============================================================================

/// High-level event category, used to partition handlers into channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Message events (private and group messages).
    Message,
    /// Notice events (recalls, pokes, member changes, ...).
    Notice,
    /// Request events (friend and group-join requests).
    Request,
    /// Meta events (lifecycle, heartbeat).
    Meta,
    /// Unrecognized `post_type`.
    Other,
}

// ============================================================================
// Event
// ============================================================================

/// An inbound event: the typed view plus the raw frame it was built from.
#[derive(Debug)]
pub struct Event {
    raw: Value,
    flags: FlagStore,
    kind: EventKind,
}

/// The typed payload of an [`Event`].
#[derive(Debug)]
pub enum EventKind {
    /// A private or group message.
    Message(MessageEvent),
    /// A notice.
    Notice(NoticeEvent),
    /// A request.
    Request(RequestEvent),
    /// A meta event.
    Meta(MetaEvent),
    /// An event whose `post_type` (or subtype) this crate does not model.
    Other,
}

impl Event {
    /// Builds an event from a raw JSON frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::BadField`] when `post_type` is missing, or
    /// when a recognized variant lacks one of its required fields.
    pub fn parse(raw: Value) -> ProtocolResult<Event> {
        let post_type = field_str(&raw, "post_type")?;
        let kind = match post_type {
            "message" => EventKind::Message(MessageEvent::from_raw(&raw)?),
            "notice" => EventKind::Notice(NoticeEvent::from_raw(&raw)?),
            "request" => match RequestEvent::from_raw(&raw)? {
                Some(req) => EventKind::Request(req),
                None => EventKind::Other,
            },
            "meta_event" => EventKind::Meta(MetaEvent::from_raw(&raw)?),
            _ => EventKind::Other,
        };
        Ok(Event {
            raw,
            flags: FlagStore::new(),
            kind,
        })
    }

    /// Parses an event from a raw JSON string.
    pub fn from_json_str(raw: &str) -> ProtocolResult<Event> {
        let value: Value = serde_json::from_str(raw)?;
        Self::parse(value)
    }

    /// Returns the typed payload.
    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    /// Returns the high-level category.
    pub fn event_type(&self) -> EventType {
        match &self.kind {
            EventKind::Message(_) => EventType::Message,
            EventKind::Notice(_) => EventType::Notice,
            EventKind::Request(_) => EventType::Request,
            EventKind::Meta(_) => EventType::Meta,
            EventKind::Other => EventType::Other,
        }
    }

    /// Returns the raw frame this event was built from.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Returns the flag-bag attached to this event.
    pub fn flags(&self) -> &FlagStore {
        &self.flags
    }

    /// Wall-clock timestamp of the event.
    pub fn time(&self) -> i64 {
        match &self.kind {
            EventKind::Message(e) => e.time,
            EventKind::Notice(e) => e.time,
            EventKind::Request(e) => e.time,
            EventKind::Meta(e) => e.time,
            EventKind::Other => opt_i64(&self.raw, "time").unwrap_or(0),
        }
    }

    /// Id of the bot account this event was reported to.
    pub fn self_id(&self) -> i64 {
        match &self.kind {
            EventKind::Message(e) => e.self_id,
            EventKind::Notice(e) => e.self_id,
            EventKind::Request(e) => e.self_id,
            EventKind::Meta(e) => e.self_id,
            EventKind::Other => opt_i64(&self.raw, "self_id").unwrap_or(0),
        }
    }

    /// The message payload, when this is a message event.
    pub fn message(&self) -> Option<&MessageEvent> {
        match &self.kind {
            EventKind::Message(e) => Some(e),
            _ => None,
        }
    }

    /// Joined plain text of a message event, empty otherwise.
    pub fn text(&self) -> &str {
        self.message().map(MessageEvent::text).unwrap_or("")
    }

    /// A short dotted name for logging, e.g. `message.group`.
    pub fn describe(&self) -> String {
        match &self.kind {
            EventKind::Message(e) => match e.scope {
                MessageScope::Private { .. } => "message.private".to_string(),
                MessageScope::Group { .. } => "message.group".to_string(),
            },
            EventKind::Notice(e) => format!("notice.{}", e.notice_type),
            EventKind::Request(e) => match e.kind {
                RequestKind::Friend => "request.friend".to_string(),
                RequestKind::GroupAdd => "request.group.add".to_string(),
                RequestKind::GroupInvite => "request.group.invite".to_string(),
            },
            EventKind::Meta(e) => match &e.kind {
                MetaKind::Lifecycle { sub_type } => format!("meta.lifecycle.{sub_type}"),
                MetaKind::Heartbeat { .. } => "meta.heartbeat".to_string(),
                MetaKind::Other => "meta.other".to_string(),
            },
            EventKind::Other => "other".to_string(),
        }
    }
}

// ============================================================================
// Message events
// ============================================================================

/// The sender identity attached to a message event.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Sender {
    /// Sender user id.
    pub user_id: i64,
    /// Nickname.
    pub nickname: Option<String>,
    /// Group name card, group messages only.
    pub card: Option<String>,
    /// Group role (`owner` / `admin` / `member`), group messages only.
    pub role: Option<String>,
}

/// The anonymous identity of an anonymous group message.
#[derive(Debug, Clone, Deserialize)]
pub struct Anonymous {
    /// Anonymous user id.
    pub id: i64,
    /// Anonymous display name.
    pub name: String,
    /// Flag needed to ban this anonymous user.
    pub flag: String,
}

/// Where a message was sent.
#[derive(Debug)]
pub enum MessageScope {
    /// A private (direct) message.
    Private {
        /// `friend`, `group` (temp session) or `other`.
        sub_type: String,
    },
    /// A group message.
    Group {
        /// The group id.
        group_id: i64,
        /// `normal`, `anonymous` or `notice`.
        sub_type: String,
        /// Present on anonymous messages.
        anonymous: Option<Anonymous>,
    },
}

/// A message event.
#[derive(Debug)]
pub struct MessageEvent {
    /// Event timestamp.
    pub time: i64,
    /// Receiving bot account.
    pub self_id: i64,
    /// Message id.
    pub message_id: i64,
    /// Sender user id.
    pub user_id: i64,
    /// Sender identity.
    pub sender: Sender,
    /// Message content.
    pub message: Message,
    /// Private/group scope.
    pub scope: MessageScope,
    /// Font id, when reported.
    pub font: Option<i64>,
    text: String,
}

impl MessageEvent {
    fn from_raw(raw: &Value) -> ProtocolResult<MessageEvent> {
        let message: Message = match raw.get("message") {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|_| ProtocolError::BadField("message"))?,
            None => Message::new(),
        };
        let sender: Sender = raw
            .get("sender")
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default();

        let sub_type = opt_str(raw, "sub_type").unwrap_or("normal").to_string();
        let scope = match field_str(raw, "message_type")? {
            "private" => MessageScope::Private { sub_type },
            "group" => MessageScope::Group {
                group_id: field_i64(raw, "group_id")?,
                sub_type,
                anonymous: raw
                    .get("anonymous")
                    .and_then(|value| serde_json::from_value(value.clone()).ok()),
            },
            _ => return Err(ProtocolError::BadField("message_type")),
        };

        let text = message.extract_plain_text();
        Ok(MessageEvent {
            time: field_i64(raw, "time")?,
            self_id: field_i64(raw, "self_id")?,
            message_id: field_i64(raw, "message_id")?,
            user_id: field_i64(raw, "user_id")?,
            sender,
            message,
            scope,
            font: opt_i64(raw, "font"),
            text,
        })
    }

    /// Joined plain text content of the message.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether this is a private message.
    pub fn is_private(&self) -> bool {
        matches!(self.scope, MessageScope::Private { .. })
    }

    /// Whether this is a group message.
    pub fn is_group(&self) -> bool {
        matches!(self.scope, MessageScope::Group { .. })
    }

    /// The group id, for group messages.
    pub fn group_id(&self) -> Option<i64> {
        match &self.scope {
            MessageScope::Group { group_id, .. } => Some(*group_id),
            MessageScope::Private { .. } => None,
        }
    }
}

// ============================================================================
// Notice events
// ============================================================================

/// A notice event.
///
/// Notices share a flat field set across subtypes; [`NoticeEvent::kind`]
/// derives the discriminant for matching.
#[derive(Debug)]
pub struct NoticeEvent {
    /// Event timestamp.
    pub time: i64,
    /// Receiving bot account.
    pub self_id: i64,
    /// The `notice_type` discriminant, verbatim.
    pub notice_type: String,
    /// The `sub_type` discriminant, when present.
    pub sub_type: Option<String>,
    /// Subject user id.
    pub user_id: Option<i64>,
    /// Group id, for group notices.
    pub group_id: Option<i64>,
    /// Operator user id (who performed the action).
    pub operator_id: Option<i64>,
    /// Target user id (poke, lucky-king).
    pub target_id: Option<i64>,
    /// Message id (recalls).
    pub message_id: Option<i64>,
    /// Honor type (`talkative`, `performer`, `emotion`).
    pub honor_type: Option<String>,
}

/// Discriminant of a [`NoticeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    /// A group file upload.
    GroupUpload,
    /// A group admin change.
    GroupAdmin,
    /// A member left (or was removed from) a group.
    GroupDecrease,
    /// A member joined a group.
    GroupIncrease,
    /// A group mute change.
    GroupBan,
    /// A friend was added.
    FriendAdd,
    /// A group message was recalled.
    GroupRecall,
    /// A private message was recalled.
    FriendRecall,
    /// Somebody poked somebody.
    Poke,
    /// The red-envelope lucky king was drawn.
    LuckyKing,
    /// A group honor changed.
    Honor,
    /// Anything else.
    Other,
}

impl NoticeEvent {
    fn from_raw(raw: &Value) -> ProtocolResult<NoticeEvent> {
        Ok(NoticeEvent {
            time: field_i64(raw, "time")?,
            self_id: field_i64(raw, "self_id")?,
            notice_type: field_str(raw, "notice_type")?.to_string(),
            sub_type: opt_str(raw, "sub_type").map(str::to_string),
            user_id: opt_i64(raw, "user_id"),
            group_id: opt_i64(raw, "group_id"),
            operator_id: opt_i64(raw, "operator_id"),
            target_id: opt_i64(raw, "target_id"),
            message_id: opt_i64(raw, "message_id"),
            honor_type: opt_str(raw, "honor_type").map(str::to_string),
        })
    }

    /// Derives the notice discriminant.
    pub fn kind(&self) -> NoticeKind {
        match (self.notice_type.as_str(), self.sub_type.as_deref()) {
            ("group_upload", _) => NoticeKind::GroupUpload,
            ("group_admin", _) => NoticeKind::GroupAdmin,
            ("group_decrease", _) => NoticeKind::GroupDecrease,
            ("group_increase", _) => NoticeKind::GroupIncrease,
            ("group_ban", _) => NoticeKind::GroupBan,
            ("friend_add", _) => NoticeKind::FriendAdd,
            ("group_recall", _) => NoticeKind::GroupRecall,
            ("friend_recall", _) => NoticeKind::FriendRecall,
            ("notify", Some("poke")) => NoticeKind::Poke,
            ("notify", Some("lucky_king")) => NoticeKind::LuckyKing,
            ("notify", Some("honor")) => NoticeKind::Honor,
            _ => NoticeKind::Other,
        }
    }
}

// ============================================================================
// Request events
// ============================================================================

/// Discriminant of a [`RequestEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// A friend request.
    Friend,
    /// A request to join a group.
    GroupAdd,
    /// An invitation for the bot to join a group.
    GroupInvite,
}

/// A request event.
#[derive(Debug)]
pub struct RequestEvent {
    /// Event timestamp.
    pub time: i64,
    /// Receiving bot account.
    pub self_id: i64,
    /// Request discriminant.
    pub kind: RequestKind,
    /// Requesting user id.
    pub user_id: i64,
    /// Group id, for group requests.
    pub group_id: Option<i64>,
    /// Free-form request comment.
    pub comment: String,
    /// Flag to pass back when approving or rejecting.
    pub flag: String,
}

impl RequestEvent {
    /// Returns `Ok(None)` for request types this crate does not model; the
    /// caller downgrades the event to `Other` with its raw map intact.
    fn from_raw(raw: &Value) -> ProtocolResult<Option<RequestEvent>> {
        let kind = match field_str(raw, "request_type")? {
            "friend" => RequestKind::Friend,
            "group" => match opt_str(raw, "sub_type") {
                Some("add") => RequestKind::GroupAdd,
                Some("invite") => RequestKind::GroupInvite,
                _ => return Ok(None),
            },
            _ => return Ok(None),
        };
        Ok(Some(RequestEvent {
            time: field_i64(raw, "time")?,
            self_id: field_i64(raw, "self_id")?,
            kind,
            user_id: field_i64(raw, "user_id")?,
            group_id: opt_i64(raw, "group_id"),
            comment: opt_str(raw, "comment").unwrap_or("").to_string(),
            flag: opt_str(raw, "flag").unwrap_or("").to_string(),
        }))
    }
}

// ============================================================================
// Meta events
// ============================================================================

/// Payload of a [`MetaEvent`].
#[derive(Debug)]
pub enum MetaKind {
    /// Endpoint lifecycle report (`enable` / `disable` / `connect`).
    Lifecycle {
        /// The lifecycle subtype.
        sub_type: String,
    },
    /// Periodic heartbeat.
    Heartbeat {
        /// Heartbeat interval in milliseconds.
        interval: Option<i64>,
        /// Opaque endpoint status map.
        status: Value,
    },
    /// Anything else.
    Other,
}

/// A meta event.
#[derive(Debug)]
pub struct MetaEvent {
    /// Event timestamp.
    pub time: i64,
    /// Receiving bot account.
    pub self_id: i64,
    /// Meta payload.
    pub kind: MetaKind,
}

impl MetaEvent {
    fn from_raw(raw: &Value) -> ProtocolResult<MetaEvent> {
        let kind = match field_str(raw, "meta_event_type")? {
            "lifecycle" => MetaKind::Lifecycle {
                sub_type: opt_str(raw, "sub_type").unwrap_or("").to_string(),
            },
            "heartbeat" => MetaKind::Heartbeat {
                interval: opt_i64(raw, "interval"),
                status: raw.get("status").cloned().unwrap_or(Value::Null),
            },
            _ => MetaKind::Other,
        };
        Ok(MetaEvent {
            time: field_i64(raw, "time")?,
            self_id: field_i64(raw, "self_id")?,
            kind,
        })
    }

    /// Whether this is a heartbeat.
    pub fn is_heartbeat(&self) -> bool {
        matches!(self.kind, MetaKind::Heartbeat { .. })
    }
}

// ============================================================================
// Field helpers
// ============================================================================

fn field_i64(raw: &Value, key: &'static str) -> ProtocolResult<i64> {
    opt_i64(raw, key).ok_or(ProtocolError::BadField(key))
}

fn opt_i64(raw: &Value, key: &str) -> Option<i64> {
    raw.get(key).and_then(Value::as_i64)
}

fn field_str<'a>(raw: &'a Value, key: &'static str) -> ProtocolResult<&'a str> {
    opt_str(raw, key).ok_or(ProtocolError::BadField(key))
}

fn opt_str<'a>(raw: &'a Value, key: &str) -> Option<&'a str> {
    raw.get(key).and_then(Value::as_str)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_private_message() {
        let event = Event::parse(json!({
            "post_type": "message",
            "message_type": "private",
            "sub_type": "friend",
            "time": 1700000000,
            "self_id": 10,
            "message_id": 42,
            "user_id": 20,
            "sender": {"user_id": 20, "nickname": "alice"},
            "message": [{"type": "text", "data": {"text": "hi"}}]
        }))
        .unwrap();

        assert_eq!(event.event_type(), EventType::Message);
        let msg = event.message().unwrap();
        assert!(msg.is_private());
        assert_eq!(msg.text(), "hi");
        assert_eq!(msg.sender.nickname.as_deref(), Some("alice"));
        assert_eq!(event.describe(), "message.private");
    }

    #[test]
    fn test_parse_group_message_cq_form() {
        let event = Event::parse(json!({
            "post_type": "message",
            "message_type": "group",
            "time": 1700000000,
            "self_id": 10,
            "message_id": 43,
            "user_id": 20,
            "group_id": 300,
            "message": "hey [CQ:at,qq=10]"
        }))
        .unwrap();

        let msg = event.message().unwrap();
        assert_eq!(msg.group_id(), Some(300));
        assert_eq!(msg.message.mentioned_users(), vec![10]);
        assert_eq!(event.text(), "hey ");
    }

    #[test]
    fn test_parse_notice_poke() {
        let event = Event::parse(json!({
            "post_type": "notice",
            "notice_type": "notify",
            "sub_type": "poke",
            "time": 1700000000,
            "self_id": 10,
            "user_id": 20,
            "target_id": 10,
            "group_id": 300
        }))
        .unwrap();

        match event.kind() {
            EventKind::Notice(notice) => {
                assert_eq!(notice.kind(), NoticeKind::Poke);
                assert_eq!(notice.target_id, Some(10));
            }
            other => panic!("expected notice, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_request_and_meta() {
        let event = Event::parse(json!({
            "post_type": "request",
            "request_type": "group",
            "sub_type": "invite",
            "time": 1, "self_id": 10, "user_id": 20, "group_id": 5,
            "flag": "abc"
        }))
        .unwrap();
        match event.kind() {
            EventKind::Request(req) => assert_eq!(req.kind, RequestKind::GroupInvite),
            other => panic!("expected request, got {other:?}"),
        }

        let event = Event::parse(json!({
            "post_type": "meta_event",
            "meta_event_type": "heartbeat",
            "time": 1, "self_id": 10, "interval": 5000, "status": {"online": true}
        }))
        .unwrap();
        match event.kind() {
            EventKind::Meta(meta) => assert!(meta.is_heartbeat()),
            other => panic!("expected meta, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_post_type_preserved() {
        let raw = json!({"post_type": "wild", "time": 1, "payload": {"x": 1}});
        let event = Event::parse(raw.clone()).unwrap();
        assert_eq!(event.event_type(), EventType::Other);
        assert_eq!(event.raw(), &raw);
    }

    #[test]
    fn test_missing_post_type_rejected() {
        assert!(Event::parse(json!({"retcode": 0})).is_err());
    }

    #[test]
    fn test_flags_attached() {
        let event = Event::parse(json!({
            "post_type": "notice", "notice_type": "friend_add",
            "time": 1, "self_id": 10, "user_id": 20
        }))
        .unwrap();
        assert!(event.flags().mark("plugin.a", "handled", Value::Null));
        assert!(event.flags().check("plugin.a", "handled", None));
    }
}
