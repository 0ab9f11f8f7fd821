//! Flag-bag attached to events.
//!
//! Plugins use flags to mark an event as "already handled by X" without
//! mutating its content. The store is a sparse `(namespace, name) → value`
//! map, lazily allocated on first write.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;

/// A sparse, append-only flag store.
///
/// Marking the same `(namespace, name)` pair twice is refused: a flag is a
/// statement of fact made once, and plugins rely on it never flipping.
#[derive(Debug, Default)]
pub struct FlagStore {
    inner: Mutex<Option<HashMap<String, HashMap<String, Value>>>>,
}

impl FlagStore {
    /// Creates an empty flag store. No map is allocated until first write.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the event with `(namespace, name) = val`.
    ///
    /// Returns `false` when the flag already exists (the original value is
    /// kept).
    pub fn mark(&self, namespace: &str, name: &str, val: Value) -> bool {
        let mut guard = self.inner.lock();
        let store = guard.get_or_insert_with(HashMap::new);
        let space = store.entry(namespace.to_string()).or_default();
        if space.contains_key(name) {
            return false;
        }
        space.insert(name.to_string(), val);
        true
    }

    /// Checks whether the flag exists and, if `val` is given, carries that
    /// exact value.
    pub fn check(&self, namespace: &str, name: &str, val: Option<&Value>) -> bool {
        let guard = self.inner.lock();
        let Some(store) = guard.as_ref() else {
            return false;
        };
        match store.get(namespace).and_then(|space| space.get(name)) {
            Some(found) => match val {
                Some(expected) => found == expected,
                None => true,
            },
            None => false,
        }
    }

    /// Returns a clone of the flag value, if present.
    pub fn get(&self, namespace: &str, name: &str) -> Option<Value> {
        let guard = self.inner.lock();
        guard
            .as_ref()
            .and_then(|store| store.get(namespace))
            .and_then(|space| space.get(name))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mark_and_check() {
        let flags = FlagStore::new();
        assert!(!flags.check("ns", "seen", None));

        assert!(flags.mark("ns", "seen", Value::Null));
        assert!(flags.check("ns", "seen", None));
        assert!(!flags.check("other", "seen", None));
    }

    #[test]
    fn test_duplicate_mark_refused() {
        let flags = FlagStore::new();
        assert!(flags.mark("ns", "count", json!(1)));
        assert!(!flags.mark("ns", "count", json!(2)));
        assert_eq!(flags.get("ns", "count"), Some(json!(1)));
    }

    #[test]
    fn test_check_with_value() {
        let flags = FlagStore::new();
        flags.mark("ns", "owner", json!("plugin-a"));
        assert!(flags.check("ns", "owner", Some(&json!("plugin-a"))));
        assert!(!flags.check("ns", "owner", Some(&json!("plugin-b"))));
    }
}
