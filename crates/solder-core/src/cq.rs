//! CQ-string codec.
//!
//! The CQ string is the flat textual encoding of a message: plain text runs
//! interleaved with `[CQ:type,k=v,k=v]` entities, using four escape pairs:
//!
//! | char | escape   |
//! |------|----------|
//! | `&`  | `&amp;`  |
//! | `[`  | `&#91;`  |
//! | `]`  | `&#93;`  |
//! | `,`  | `&#44;`  |
//!
//! Plain text escapes only `&`, `[` and `]`; entity values additionally
//! escape `,`. Parameter values of unknown entity types are numerically
//! coerced: `-?\d+` becomes an integer, anything `f64`-parseable becomes a
//! float, everything else stays a string.

use serde_json::{Map, Number, Value};

use crate::segment::{NodeData, OtherData, Segment};

// ============================================================================
// Escaping
// ============================================================================

/// Escapes plain text for embedding next to CQ entities.
///
/// Escapes: `&` → `&amp;`, `[` → `&#91;`, `]` → `&#93;`
pub fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('[', "&#91;")
        .replace(']', "&#93;")
}

/// Unescapes CQ special characters back to plain text.
pub fn unescape_text(text: &str) -> String {
    text.replace("&#91;", "[")
        .replace("&#93;", "]")
        .replace("&#44;", ",")
        .replace("&amp;", "&")
}

/// Escapes a CQ entity parameter value.
///
/// Escapes: `&` → `&amp;`, `[` → `&#91;`, `]` → `&#93;`, `,` → `&#44;`
pub fn escape_value(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('[', "&#91;")
        .replace(']', "&#93;")
        .replace(',', "&#44;")
}

/// Unescapes a CQ entity parameter value.
pub fn unescape_value(value: &str) -> String {
    unescape_text(value)
}

// ============================================================================
// Numeric coercion
// ============================================================================

/// Coerces an entity parameter value per the CQ rules.
///
/// `-?\d+` becomes an integer; otherwise anything that parses as a finite
/// float becomes a float; otherwise the string is kept.
pub fn coerce_scalar(s: &str) -> Value {
    if is_integer_literal(s) {
        if let Ok(n) = s.parse::<i64>() {
            return Value::Number(Number::from(n));
        }
    }
    if let Ok(f) = s.parse::<f64>() {
        if f.is_finite() {
            if let Some(n) = Number::from_f64(f) {
                return Value::Number(n);
            }
        }
    }
    Value::String(s.to_string())
}

fn is_integer_literal(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

// ============================================================================
// Parsing
// ============================================================================

/// Parses a CQ string into a segment list.
///
/// Text runs become implicit `text` segments (unescaped); each
/// `[CQ:type,...]` entity becomes its typed segment, with unknown types
/// preserved as [`Segment::Other`] under numeric coercion. `node` entities
/// parse their `content` value recursively.
pub fn parse_cq_string(input: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut rest = input;

    while !rest.is_empty() {
        match rest.find("[CQ:") {
            Some(start) => {
                if start > 0 {
                    let text = unescape_text(&rest[..start]);
                    if !text.is_empty() {
                        segments.push(Segment::text(text));
                    }
                }
                let entity = &rest[start..];
                match entity.find(']') {
                    Some(end) => {
                        segments.push(parse_entity(&entity[4..end]));
                        rest = &entity[end + 1..];
                    }
                    None => {
                        // Unterminated entity: keep it as literal text.
                        segments.push(Segment::text(unescape_text(entity)));
                        rest = "";
                    }
                }
            }
            None => {
                let text = unescape_text(rest);
                if !text.is_empty() {
                    segments.push(Segment::text(text));
                }
                rest = "";
            }
        }
    }

    segments
}

/// Parses the inside of one `[CQ:...]` entity (without the brackets and the
/// leading `CQ:`).
fn parse_entity(body: &str) -> Segment {
    let mut tokens = body.split(',');
    let kind = tokens.next().unwrap_or("").to_string();

    let mut params: Vec<(String, String)> = Vec::new();
    for token in tokens {
        match token.split_once('=') {
            Some((key, val)) => params.push((key.to_string(), unescape_value(val))),
            None if token.is_empty() => {}
            None => params.push((token.to_string(), String::new())),
        }
    }

    if kind == "node" {
        return node_from_params(&params);
    }

    if is_known_kind(&kind) {
        let data: Map<String, Value> = params
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        Segment::from_tagged(&kind, Value::Object(data))
    } else {
        let data: Map<String, Value> = params
            .iter()
            .map(|(k, v)| (k.clone(), coerce_scalar(v)))
            .collect();
        Segment::Other(OtherData { kind, data })
    }
}

fn node_from_params(params: &[(String, String)]) -> Segment {
    let get = |key: &str| -> Option<String> {
        params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    };
    Segment::Node(NodeData {
        id: get("id"),
        user_id: get("user_id"),
        nickname: get("nickname"),
        content: get("content").map(|inner| parse_cq_string(&inner)),
    })
}

fn is_known_kind(kind: &str) -> bool {
    matches!(
        kind,
        "text"
            | "face"
            | "image"
            | "record"
            | "video"
            | "at"
            | "rps"
            | "dice"
            | "shake"
            | "poke"
            | "anonymous"
            | "share"
            | "contact"
            | "location"
            | "music"
            | "reply"
            | "forward"
            | "node"
            | "xml"
            | "json"
    )
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::TextData;

    #[test]
    fn test_escaping() {
        assert_eq!(escape_text("Hello [World]"), "Hello &#91;World&#93;");
        assert_eq!(escape_text("A & B"), "A &amp; B");
        assert_eq!(unescape_text("&#91;x&#93; &amp;"), "[x] &");

        assert_eq!(escape_value("a,b,c"), "a&#44;b&#44;c");
        assert_eq!(unescape_value("a&#44;b&#44;c"), "a,b,c");
    }

    #[test]
    fn test_parse_mixed() {
        let segments = parse_cq_string("Hello [CQ:face,id=178] World");
        assert_eq!(segments.len(), 3);
        assert!(matches!(&segments[0], Segment::Text(TextData { text }) if text == "Hello "));
        assert!(matches!(&segments[1], Segment::Face(_)));
        assert!(matches!(&segments[2], Segment::Text(TextData { text }) if text == " World"));
    }

    #[test]
    fn test_parse_escaped_text() {
        let segments = parse_cq_string("&#91;A&#93;[CQ:image,file=x.jpg]");
        assert_eq!(segments.len(), 2);
        assert!(matches!(&segments[0], Segment::Text(TextData { text }) if text == "[A]"));
        match &segments[1] {
            Segment::Image(data) => assert_eq!(data.file, "x.jpg"),
            other => panic!("expected image, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_escaped_value() {
        let segments = parse_cq_string("[CQ:share,url=http://e.com/?a=1&amp;b=2,title=x&#44;y]");
        match &segments[0] {
            Segment::Share(data) => {
                assert_eq!(data.url, "http://e.com/?a=1&b=2");
                assert_eq!(data.title, "x,y");
            }
            other => panic!("expected share, got {other:?}"),
        }
    }

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(coerce_scalar("123"), Value::from(123));
        assert_eq!(coerce_scalar("-7"), Value::from(-7));
        assert_eq!(coerce_scalar("1.5"), Value::from(1.5));
        assert_eq!(coerce_scalar("abc"), Value::from("abc"));
        // Leading '+' is not an integer literal but parses as a float.
        assert_eq!(coerce_scalar("+3"), Value::from(3.0));
    }

    #[test]
    fn test_unknown_entity_coerced() {
        let segments = parse_cq_string("[CQ:market_face,emoji_id=abc,tab=10]");
        match &segments[0] {
            Segment::Other(data) => {
                assert_eq!(data.kind, "market_face");
                assert_eq!(data.data["emoji_id"], "abc");
                assert_eq!(data.data["tab"], 10);
            }
            other => panic!("expected Other, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_node_recursive() {
        let inner: String = [Segment::text("a,b"), Segment::at(7)]
            .iter()
            .map(Segment::to_cq_code)
            .collect();
        let raw = format!("[CQ:node,user_id=42,nickname=nick,content={}]", escape_value(&inner));
        let segments = parse_cq_string(&raw);
        match &segments[0] {
            Segment::Node(node) => {
                let content = node.content.as_ref().unwrap();
                assert_eq!(content.len(), 2);
                assert!(matches!(&content[0], Segment::Text(TextData { text }) if text == "a,b"));
            }
            other => panic!("expected node, got {other:?}"),
        }
    }

    #[test]
    fn test_unterminated_entity_kept_as_text() {
        let segments = parse_cq_string("oops [CQ:face,id=1");
        assert_eq!(segments.len(), 2);
        assert!(matches!(&segments[1], Segment::Text(TextData { text }) if text == "[CQ:face,id=1"));
    }
}
