//! Round-trip property for the segment-list ↔ CQ-string mapping.
//!
//! Messages are generated in canonical form (no empty or adjacent text
//! segments, since the string form cannot distinguish `text("a"), text("b")`
//! from `text("ab")`), then encoded and decoded back.

use proptest::prelude::*;

use solder_core::cq::parse_cq_string;
use solder_core::segment::{OtherData, Segment};
use solder_core::Message;

fn arb_text_segment() -> impl Strategy<Value = Segment> {
    // Any printable text, including the characters the codec must escape.
    "[a-zA-Z0-9 ,&\\[\\]=:!?]{1,20}".prop_map(Segment::text)
}

fn arb_plain_value() -> impl Strategy<Value = serde_json::Value> {
    prop_oneof![
        // Alphabetic strings never look numeric, so coercion keeps them.
        "[a-z]{1,10}".prop_map(serde_json::Value::from),
        any::<i64>().prop_map(serde_json::Value::from),
    ]
}

const KNOWN_TAGS: &[&str] = &[
    "text", "face", "image", "record", "video", "at", "rps", "dice", "shake", "poke", "anonymous",
    "share", "contact", "location", "music", "reply", "forward", "node", "xml", "json",
];

fn arb_other_segment() -> impl Strategy<Value = Segment> {
    (
        "[a-z_]{3,12}",
        prop::collection::btree_map("[a-z_]{1,8}", arb_plain_value(), 0..4),
    )
        .prop_filter("unknown tag must not collide with a known one", |(kind, _)| {
            !KNOWN_TAGS.contains(&kind.as_str())
        })
        .prop_map(|(kind, data)| {
            Segment::Other(OtherData {
                kind,
                data: data.into_iter().collect(),
            })
        })
}

fn arb_simple_segment() -> impl Strategy<Value = Segment> {
    prop_oneof![
        (1i64..1_000_000).prop_map(Segment::face),
        (1i64..10_000_000_000).prop_map(Segment::at),
        Just(Segment::at_all()),
        "[a-zA-Z0-9 ,&\\[\\]./_-]{1,24}".prop_map(Segment::image),
        "[0-9]{1,12}".prop_map(Segment::reply),
        ("[a-zA-Z0-9,&\\[\\]:/._-]{1,20}", "[a-zA-Z0-9 ,]{1,12}")
            .prop_map(|(url, title)| Segment::share(url, title)),
        Just(Segment::Dice),
        Just(Segment::Rps),
        arb_other_segment(),
    ]
}

fn arb_node_segment() -> impl Strategy<Value = Segment> {
    (
        1i64..10_000_000_000,
        "[a-zA-Z0-9]{1,10}",
        arb_canonical_segments(3, false),
    )
        .prop_map(|(user_id, nickname, content)| Segment::node_custom(user_id, nickname, content))
}

/// A canonical segment list: no empty text, no two adjacent text segments.
fn arb_canonical_segments(max_len: usize, with_nodes: bool) -> BoxedStrategy<Vec<Segment>> {
    let non_text = if with_nodes {
        prop_oneof![arb_simple_segment(), arb_node_segment()].boxed()
    } else {
        arb_simple_segment().boxed()
    };
    prop::collection::vec((prop::option::of(arb_text_segment()), non_text), 1..=max_len)
        .prop_map(|pairs| {
            let mut out = Vec::new();
            for (text, seg) in pairs {
                if let Some(text) = text {
                    out.push(text);
                }
                out.push(seg);
            }
            out
        })
        .boxed()
}

proptest! {
    /// decode(encode(xs)) == xs for canonical mixed messages.
    #[test]
    fn roundtrip_mixed(segments in arb_canonical_segments(6, true)) {
        let msg = Message::from_segments(segments.clone());
        let encoded = msg.to_cq_string();
        let decoded = parse_cq_string(&encoded);
        prop_assert_eq!(decoded, segments);
    }

    /// Pure-text messages are emitted raw, so they round-trip as long as
    /// the text does not itself spell an escape sequence or a CQ opener.
    #[test]
    fn roundtrip_pure_text(text in "[a-zA-Z0-9 ,.!?\\]]{1,40}") {
        let msg = Message::from_text(text.clone());
        let encoded = msg.to_cq_string();
        prop_assert_eq!(&encoded, &text);
        let decoded = parse_cq_string(&encoded);
        prop_assert_eq!(decoded, vec![Segment::text(text)]);
    }

    /// Escaping is injective: escaped text always unescapes to the original.
    #[test]
    fn escape_unescape_inverse(text in ".{0,50}") {
        prop_assert_eq!(
            solder_core::cq::unescape_value(&solder_core::cq::escape_value(&text)),
            text.clone()
        );
        prop_assert_eq!(
            solder_core::cq::unescape_text(&solder_core::cq::escape_text(&text)),
            text
        );
    }
}
