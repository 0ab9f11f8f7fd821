//! The process-wide bot name registry.
//!
//! One process may own several bots, but their names cannot collide: the
//! name keys logs, shared-object namespaces and operator tooling.

use std::collections::HashSet;
use std::sync::OnceLock;

use parking_lot::Mutex;

use crate::error::{RuntimeError, RuntimeResult};

fn names() -> &'static Mutex<HashSet<String>> {
    static NAMES: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    NAMES.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Claims a bot name for the process lifetime of the bot.
pub fn claim(name: &str) -> RuntimeResult<()> {
    let mut names = names().lock();
    if !names.insert(name.to_string()) {
        return Err(RuntimeError::DuplicateBot(name.to_string()));
    }
    Ok(())
}

/// Releases a claimed name. Called when the bot is dropped.
pub fn release(name: &str) {
    names().lock().remove(name);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_and_release() {
        claim("registry-test-bot").unwrap();
        assert!(matches!(
            claim("registry-test-bot"),
            Err(RuntimeError::DuplicateBot(_))
        ));
        release("registry-test-bot");
        claim("registry-test-bot").unwrap();
        release("registry-test-bot");
    }
}
