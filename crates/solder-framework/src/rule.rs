//! Session rules: equivalence predicates over events.
//!
//! A session rule decides whether two events belong to the same logical
//! conversation. Any reflexive, symmetric and deterministic predicate is
//! admissible; the session manager does not require transitivity
//! (non-transitive rules simply produce more sessions).

use serde_json::Value;
use solder_core::Event;

/// A binary equivalence predicate over events.
pub trait SessionRule: Send + Sync {
    /// Returns true when both events belong to the same conversation.
    fn compare(&self, e1: &Event, e2: &Event) -> bool;
}

/// A rule comparing nested fields of the raw event maps.
///
/// Each path is a dotted field chain, e.g. `"sender.user_id"` or
/// `"group_id"`. Two events compare equal when every path resolves in both
/// events to the same value. A path missing from either event never
/// compares equal, so events of a different shape fall into their own
/// sessions instead of being lumped together.
///
/// ```rust,ignore
/// // One session per (group, sender) pair:
/// let rule = AttrRule::new(["group_id", "sender.user_id"]);
/// ```
pub struct AttrRule {
    paths: Vec<Vec<String>>,
}

impl AttrRule {
    /// Creates a rule over the given dotted field paths.
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            paths: paths
                .into_iter()
                .map(|p| p.as_ref().split('.').map(str::to_string).collect())
                .collect(),
        }
    }

    fn lookup<'a>(raw: &'a Value, path: &[String]) -> Option<&'a Value> {
        let mut cur = raw;
        for key in path {
            cur = cur.get(key)?;
        }
        Some(cur)
    }
}

impl SessionRule for AttrRule {
    fn compare(&self, e1: &Event, e2: &Event) -> bool {
        self.paths.iter().all(|path| {
            match (Self::lookup(e1.raw(), path), Self::lookup(e2.raw(), path)) {
                (Some(v1), Some(v2)) => v1 == v2,
                _ => false,
            }
        })
    }
}

/// A rule wrapping an arbitrary predicate.
pub struct FnRule<F>(pub F);

impl<F> SessionRule for FnRule<F>
where
    F: Fn(&Event, &Event) -> bool + Send + Sync,
{
    fn compare(&self, e1: &Event, e2: &Event) -> bool {
        (self.0)(e1, e2)
    }
}
