//! OneBot v11 message segment types.
//!
//! A message segment is the smallest unit of content in a message: plain
//! text, an image, an @mention, a reply reference, a forward node, etc.
//! Known segment types are modeled as a closed enum; tags the protocol does
//! not define fall into [`Segment::Other`] with their raw data preserved, so
//! nothing received from the endpoint is ever lost.
//!
//! # Wire format
//!
//! On the wire a segment is `{"type": "<tag>", "data": {...}}`. Segments
//! also have a flat textual encoding (the CQ string); see [`crate::cq`].

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::cq;

// ============================================================================
// Segment Enum
// ============================================================================

/// A OneBot v11 message segment.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Plain text content.
    Text(TextData),
    /// QQ emoji/face.
    Face(FaceData),
    /// Image.
    Image(ImageData),
    /// Voice/audio record.
    Record(RecordData),
    /// Video.
    Video(VideoData),
    /// @mention someone.
    At(AtData),
    /// Rock-paper-scissors magic emoji.
    Rps,
    /// Dice magic emoji.
    Dice,
    /// Window shake (legacy poke).
    Shake,
    /// Poke message.
    Poke(PokeData),
    /// Anonymous flag (send only).
    Anonymous(AnonymousData),
    /// Link share card.
    Share(ShareData),
    /// Contact recommendation.
    Contact(ContactData),
    /// Location.
    Location(LocationData),
    /// Music share card.
    Music(MusicData),
    /// Reply to a message.
    Reply(ReplyData),
    /// Forward message reference (receive only).
    Forward(ForwardData),
    /// Forward node (for constructing forward messages).
    Node(NodeData),
    /// XML message.
    Xml(XmlData),
    /// JSON message.
    Json(JsonData),
    /// A segment type this crate does not know about.
    ///
    /// The raw data map is preserved verbatim; CQ-string parsing applies
    /// numeric coercion to its values.
    Other(OtherData),
}

impl Segment {
    /// Returns the wire tag of this segment (e.g. `"text"`, `"image"`).
    pub fn kind(&self) -> &str {
        match self {
            Segment::Text(_) => "text",
            Segment::Face(_) => "face",
            Segment::Image(_) => "image",
            Segment::Record(_) => "record",
            Segment::Video(_) => "video",
            Segment::At(_) => "at",
            Segment::Rps => "rps",
            Segment::Dice => "dice",
            Segment::Shake => "shake",
            Segment::Poke(_) => "poke",
            Segment::Anonymous(_) => "anonymous",
            Segment::Share(_) => "share",
            Segment::Contact(_) => "contact",
            Segment::Location(_) => "location",
            Segment::Music(_) => "music",
            Segment::Reply(_) => "reply",
            Segment::Forward(_) => "forward",
            Segment::Node(_) => "node",
            Segment::Xml(_) => "xml",
            Segment::Json(_) => "json",
            Segment::Other(data) => &data.kind,
        }
    }

    /// Returns true if this is a plain text segment.
    pub fn is_text(&self) -> bool {
        matches!(self, Segment::Text(_))
    }

    /// Returns the text content if this is a text segment.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Segment::Text(data) => Some(&data.text),
            _ => None,
        }
    }
}

// ============================================================================
// Segment Builder Methods
// ============================================================================

impl Segment {
    /// Creates a plain text segment.
    pub fn text(text: impl Into<String>) -> Self {
        Segment::Text(TextData { text: text.into() })
    }

    /// Creates a QQ face/emoji segment.
    pub fn face(id: i64) -> Self {
        Segment::Face(FaceData { id: id.to_string() })
    }

    /// Creates an image segment from a file path or URL.
    pub fn image(file: impl Into<String>) -> Self {
        Segment::Image(ImageData {
            file: file.into(),
            image_type: None,
            url: None,
            cache: None,
        })
    }

    /// Creates a flash image segment.
    pub fn flash_image(file: impl Into<String>) -> Self {
        Segment::Image(ImageData {
            file: file.into(),
            image_type: Some("flash".to_string()),
            url: None,
            cache: None,
        })
    }

    /// Creates a voice/record segment.
    pub fn record(file: impl Into<String>) -> Self {
        Segment::Record(RecordData {
            file: file.into(),
            magic: None,
            url: None,
        })
    }

    /// Creates a video segment.
    pub fn video(file: impl Into<String>) -> Self {
        Segment::Video(VideoData {
            file: file.into(),
            url: None,
        })
    }

    /// Creates an @mention segment for a specific user.
    pub fn at(qq: i64) -> Self {
        Segment::At(AtData { qq: qq.to_string() })
    }

    /// Creates an @all segment to mention everyone.
    pub fn at_all() -> Self {
        Segment::At(AtData {
            qq: "all".to_string(),
        })
    }

    /// Creates a poke segment.
    pub fn poke(poke_type: impl Into<String>, id: impl Into<String>) -> Self {
        Segment::Poke(PokeData {
            poke_type: poke_type.into(),
            id: id.into(),
        })
    }

    /// Creates a link share segment.
    pub fn share(url: impl Into<String>, title: impl Into<String>) -> Self {
        Segment::Share(ShareData {
            url: url.into(),
            title: title.into(),
            content: None,
            image: None,
        })
    }

    /// Creates a reply segment referencing another message.
    pub fn reply(id: impl Into<String>) -> Self {
        Segment::Reply(ReplyData { id: id.into() })
    }

    /// Creates a forward reference segment.
    pub fn forward(id: impl Into<String>) -> Self {
        Segment::Forward(ForwardData { id: id.into() })
    }

    /// Creates a forward node referencing an existing message by id.
    pub fn node(id: impl Into<String>) -> Self {
        Segment::Node(NodeData {
            id: Some(id.into()),
            user_id: None,
            nickname: None,
            content: None,
        })
    }

    /// Creates a custom forward node carrying its own segment list.
    pub fn node_custom(user_id: i64, nickname: impl Into<String>, content: Vec<Segment>) -> Self {
        Segment::Node(NodeData {
            id: None,
            user_id: Some(user_id.to_string()),
            nickname: Some(nickname.into()),
            content: Some(content),
        })
    }
}

// ============================================================================
// Segment Data Types
// ============================================================================

/// Plain text segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextData {
    /// The text content.
    pub text: String,
}

/// QQ face/emoji segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceData {
    /// The face id. See the QQ face id table.
    pub id: String,
}

/// Image segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageData {
    /// Image file name, path, URL, or base64.
    pub file: String,
    /// `"flash"` for flash images, absent for normal ones.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub image_type: Option<String>,
    /// Image URL (receive only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Whether to use the cached file (send only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<String>,
}

/// Voice/record segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordData {
    /// Audio file name, path, URL, or base64.
    pub file: String,
    /// Voice change: `"0"` or `"1"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub magic: Option<String>,
    /// Audio URL (receive only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Video segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoData {
    /// Video file name, path, URL, or base64.
    pub file: String,
    /// Video URL (receive only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// @mention segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtData {
    /// QQ number, or `"all"` for @everyone.
    pub qq: String,
}

/// Poke segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PokeData {
    /// Poke type.
    #[serde(rename = "type")]
    pub poke_type: String,
    /// Poke id.
    pub id: String,
}

/// Anonymous segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnonymousData {
    /// Whether to keep sending if anonymity fails.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore: Option<String>,
}

/// Link share segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareData {
    /// Share URL.
    pub url: String,
    /// Share title.
    pub title: String,
    /// Share description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Cover image URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Contact recommendation segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactData {
    /// `"qq"` or `"group"`.
    #[serde(rename = "type")]
    pub contact_type: String,
    /// QQ number or group id.
    pub id: String,
}

/// Location segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationData {
    /// Latitude.
    pub lat: String,
    /// Longitude.
    pub lon: String,
    /// Location title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Location description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Music share segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicData {
    /// `"qq"`, `"163"`, `"xm"` or `"custom"`.
    #[serde(rename = "type")]
    pub music_type: String,
    /// Song id (platform types).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Click-through URL (custom).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Audio URL (custom).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    /// Title (custom).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Reply segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyData {
    /// Message id being replied to.
    pub id: String,
}

/// Forward reference segment data (receive only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardData {
    /// Forward message id.
    pub id: String,
}

/// Forward node segment data.
///
/// A node either references an existing message by `id`, or carries a custom
/// sub-message as a nested segment list in `content`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    /// Reference an existing message by id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Custom node: sender user id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Custom node: sender nickname.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    /// Custom node: nested message content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<Segment>>,
}

/// XML message segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XmlData {
    /// XML content.
    pub data: String,
}

/// JSON message segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonData {
    /// JSON content.
    pub data: String,
}

/// Data for a segment type this crate does not model.
#[derive(Debug, Clone, PartialEq)]
pub struct OtherData {
    /// The wire tag.
    pub kind: String,
    /// The raw data map.
    pub data: Map<String, Value>,
}

// ============================================================================
// Serde bridge
// ============================================================================

/// The on-wire shape of a segment, used as a serde bridge.
#[derive(Serialize, Deserialize)]
struct RawSegment {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

impl Segment {
    /// Builds a segment from a wire tag and a JSON data object.
    ///
    /// Unknown tags (and known tags whose data does not fit the typed
    /// record) become [`Segment::Other`].
    pub fn from_tagged(kind: &str, data: Value) -> Segment {
        fn parse<T: serde::de::DeserializeOwned>(data: &Value) -> Option<T> {
            serde_json::from_value(data.clone()).ok()
        }

        let parsed = match kind {
            "text" => parse(&data).map(Segment::Text),
            "face" => parse(&data).map(Segment::Face),
            "image" => parse(&data).map(Segment::Image),
            "record" => parse(&data).map(Segment::Record),
            "video" => parse(&data).map(Segment::Video),
            "at" => parse(&data).map(Segment::At),
            "rps" => Some(Segment::Rps),
            "dice" => Some(Segment::Dice),
            "shake" => Some(Segment::Shake),
            "poke" => parse(&data).map(Segment::Poke),
            "anonymous" => parse(&data).map(Segment::Anonymous),
            "share" => parse(&data).map(Segment::Share),
            "contact" => parse(&data).map(Segment::Contact),
            "location" => parse(&data).map(Segment::Location),
            "music" => parse(&data).map(Segment::Music),
            "reply" => parse(&data).map(Segment::Reply),
            "forward" => parse(&data).map(Segment::Forward),
            "node" => parse(&data).map(Segment::Node),
            "xml" => parse(&data).map(Segment::Xml),
            "json" => parse(&data).map(Segment::Json),
            _ => None,
        };

        parsed.unwrap_or_else(|| {
            let map = match data {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            Segment::Other(OtherData {
                kind: kind.to_string(),
                data: map,
            })
        })
    }

    fn to_raw(&self) -> RawSegment {
        // Serialization of the typed data records cannot fail; fall back to
        // an empty object to keep the wire form well-shaped regardless.
        fn data_of<T: Serialize>(data: &T) -> Value {
            serde_json::to_value(data).unwrap_or_else(|_| Value::Object(Map::new()))
        }

        let data = match self {
            Segment::Text(d) => data_of(d),
            Segment::Face(d) => data_of(d),
            Segment::Image(d) => data_of(d),
            Segment::Record(d) => data_of(d),
            Segment::Video(d) => data_of(d),
            Segment::At(d) => data_of(d),
            Segment::Rps | Segment::Dice | Segment::Shake => Value::Object(Map::new()),
            Segment::Poke(d) => data_of(d),
            Segment::Anonymous(d) => data_of(d),
            Segment::Share(d) => data_of(d),
            Segment::Contact(d) => data_of(d),
            Segment::Location(d) => data_of(d),
            Segment::Music(d) => data_of(d),
            Segment::Reply(d) => data_of(d),
            Segment::Forward(d) => data_of(d),
            Segment::Node(d) => data_of(d),
            Segment::Xml(d) => data_of(d),
            Segment::Json(d) => data_of(d),
            Segment::Other(d) => Value::Object(d.data.clone()),
        };
        RawSegment {
            kind: self.kind().to_string(),
            data,
        }
    }
}

impl Serialize for Segment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_raw().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Segment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawSegment::deserialize(deserializer)?;
        if raw.kind.is_empty() {
            return Err(D::Error::custom("segment with empty type tag"));
        }
        Ok(Segment::from_tagged(&raw.kind, raw.data))
    }
}

// ============================================================================
// CQ Code Emission
// ============================================================================

impl Segment {
    /// Converts this segment to its CQ-code form.
    ///
    /// Text segments are emitted as escaped plain text; everything else is
    /// `[CQ:<type>,k=v,...]` with escaped values. `node` segments serialize
    /// their nested content into an escaped inner CQ string.
    pub fn to_cq_code(&self) -> String {
        if let Segment::Text(data) = self {
            return cq::escape_text(&data.text);
        }

        let raw = self.to_raw();
        let mut out = format!("[CQ:{}", raw.kind);
        if let Value::Object(map) = raw.data {
            for (key, val) in &map {
                // Nested node content is emitted as an inner CQ string, not
                // as a JSON array.
                if raw.kind == "node" && key == "content" {
                    if let Ok(segments) = serde_json::from_value::<Vec<Segment>>(val.clone()) {
                        let inner: String = segments.iter().map(Segment::to_cq_code).collect();
                        out.push_str(&format!(",content={}", cq::escape_value(&inner)));
                        continue;
                    }
                }
                out.push_str(&format!(",{}={}", key, cq::escape_value(&value_text(val))));
            }
        }
        out.push(']');
        out
    }
}

/// Renders a JSON scalar the way it appears inside a CQ entity.
fn value_text(val: &Value) -> String {
    match val {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================
