//! Message content: an ordered list of segments.
//!
//! OneBot v11 accepts two isomorphic message forms on the wire:
//!
//! - **Array form**: a JSON array of segments (preferred outbound).
//! - **String form**: a CQ string (legacy inbound).
//!
//! [`Message`] deserializes from either and always serializes to the array
//! form; [`Message::to_cq_string`] produces the string form.

use std::ops::Deref;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::cq;
use crate::segment::Segment;

/// A complete message composed of ordered segments.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Message {
    segments: Vec<Segment>,
}

impl Message {
    /// Creates an empty message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a message from a segment list.
    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    /// Creates a single-segment plain text message.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            segments: vec![Segment::text(text)],
        }
    }

    /// Parses a message from its CQ-string form.
    pub fn from_cq_string(input: &str) -> Self {
        Self {
            segments: cq::parse_cq_string(input),
        }
    }

    /// Appends a segment.
    pub fn push(&mut self, segment: Segment) {
        self.segments.push(segment);
    }

    /// Returns the segments as a slice.
    pub fn as_slice(&self) -> &[Segment] {
        &self.segments
    }

    /// Consumes the message, returning its segments.
    pub fn into_segments(self) -> Vec<Segment> {
        self.segments
    }

    /// Concatenates the content of all text segments.
    pub fn extract_plain_text(&self) -> String {
        self.segments
            .iter()
            .filter_map(Segment::as_text)
            .collect()
    }

    /// Converts the message to its CQ-string form.
    ///
    /// A pure text message is emitted raw; once any non-text segment is
    /// present, text segments are escaped so they can sit next to the CQ
    /// entities without ambiguity.
    pub fn to_cq_string(&self) -> String {
        if self.segments.iter().all(Segment::is_text) {
            return self.extract_plain_text();
        }
        self.segments.iter().map(Segment::to_cq_code).collect()
    }

    /// Returns all @mentioned user ids in the message (excluding @all).
    pub fn mentioned_users(&self) -> Vec<i64> {
        self.segments
            .iter()
            .filter_map(|seg| match seg {
                Segment::At(data) if data.qq != "all" => data.qq.parse().ok(),
                _ => None,
            })
            .collect()
    }

    /// Checks whether the message mentions everyone.
    pub fn mentions_all(&self) -> bool {
        self.segments
            .iter()
            .any(|seg| matches!(seg, Segment::At(data) if data.qq == "all"))
    }

    /// Returns the replied-to message id, if this message is a reply.
    pub fn reply_to(&self) -> Option<&str> {
        self.segments.iter().find_map(|seg| match seg {
            Segment::Reply(data) => Some(data.id.as_str()),
            _ => None,
        })
    }
}

impl Deref for Message {
    type Target = [Segment];

    fn deref(&self) -> &Self::Target {
        &self.segments
    }
}

impl FromIterator<Segment> for Message {
    fn from_iter<T: IntoIterator<Item = Segment>>(iter: T) -> Self {
        Self {
            segments: iter.into_iter().collect(),
        }
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message::from_text(text)
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::from_text(text)
    }
}

// ============================================================================
// Serde: array out, array-or-string in
// ============================================================================

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.segments.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum WireMessage {
            Array(Vec<Segment>),
            Cq(String),
        }

        match WireMessage::deserialize(deserializer)? {
            WireMessage::Array(segments) => Ok(Message::from_segments(segments)),
            WireMessage::Cq(raw) => Ok(Message::from_cq_string(&raw)),
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
    fn test_plain_text_extraction() {
        let msg = Message::from_segments(vec![
            Segment::text("Hello, "),
            Segment::at(10001000),
            Segment::text("!"),
        ]);
        assert_eq!(msg.len(), 3);
        assert_eq!(msg.extract_plain_text(), "Hello, !");
    }

    #[test]
    fn test_serialize_array_form() {
        let msg = Message::from_segments(vec![Segment::text("Hello"), Segment::face(178)]);
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"[{"type":"text","data":{"text":"Hello"}},{"type":"face","data":{"id":"178"}}]"#
        );
    }

    #[test]
    fn test_deserialize_both_forms() {
        let from_array: Message = serde_json::from_str(
            r#"[{"type":"text","data":{"text":"Hello"}},{"type":"at","data":{"qq":"10001000"}}]"#,
        )
        .unwrap();
        assert_eq!(from_array.len(), 2);

        let from_string: Message =
            serde_json::from_str(r#""Hello [CQ:face,id=178] World""#).unwrap();
        assert_eq!(from_string.len(), 3);
        assert_eq!(from_string.extract_plain_text(), "Hello  World");
    }

    #[test]
    fn test_pure_text_not_escaped() {
        let msg = Message::from_text("[A] & B");
        assert_eq!(msg.to_cq_string(), "[A] & B");
    }

    #[test]
    fn test_mixed_text_escaped() {
        // Commas in text never escape; brackets do once a CQ entity follows.
        let msg = Message::from_segments(vec![Segment::text("a,b"), Segment::at(123)]);
        assert_eq!(msg.to_cq_string(), "a,b[CQ:at,qq=123]");

        let msg = Message::from_segments(vec![Segment::text("[A]"), Segment::at(123)]);
        assert_eq!(msg.to_cq_string(), "&#91;A&#93;[CQ:at,qq=123]");
    }

    #[test]
    fn test_mentions() {
        let msg = Message::from_segments(vec![
            Segment::at(10001000),
            Segment::text(" and "),
            Segment::at(10001001),
            Segment::at_all(),
        ]);
        assert_eq!(msg.mentioned_users(), vec![10001000, 10001001]);
        assert!(msg.mentions_all());
    }

    #[test]
    fn test_reply_to() {
        let msg = Message::from_segments(vec![Segment::reply("12345"), Segment::text("ack")]);
        assert_eq!(msg.reply_to(), Some("12345"));
    }
}
