//! A manual-reset async flag.
//!
//! [`Signal`] is the one synchronization shape the session machinery keeps
//! reaching for: a boolean that tasks can `set`, `clear` and `wait` on.
//! Waiting is level-triggered (an already-set signal resolves immediately)
//! and cancellation-safe — a dropped waiter takes nothing with it.

use tokio::sync::watch;

/// A settable/clearable flag that tasks can await.
#[derive(Debug)]
pub struct Signal {
    tx: watch::Sender<bool>,
}

impl Signal {
    /// Creates a signal in the given initial state.
    pub fn new(initial: bool) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Sets the flag, waking all waiters.
    pub fn set(&self) {
        self.tx.send_replace(true);
    }

    /// Clears the flag.
    pub fn clear(&self) {
        self.tx.send_replace(false);
    }

    /// Returns the current state.
    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Waits until the flag is set. Resolves immediately if it already is.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in self, so the channel cannot close while we
        // hold &self.
        let _ = rx.wait_for(|set| *set).await;
    }

    /// Waits until the flag is cleared.
    pub async fn wait_clear(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|set| !*set).await;
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_level_triggered() {
        let signal = Signal::new(true);
        // Must resolve immediately.
        tokio::time::timeout(Duration::from_millis(10), signal.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wakes_waiters() {
        let signal = Arc::new(Signal::new(false));
        let waiter = {
            let signal = Arc::clone(&signal);
            tokio::spawn(async move { signal.wait().await })
        };
        tokio::task::yield_now().await;
        signal.set();
        tokio::time::timeout(Duration::from_millis(100), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_clear_blocks_again() {
        let signal = Signal::new(true);
        signal.clear();
        assert!(!signal.is_set());
        let timed_out = tokio::time::timeout(Duration::from_millis(10), signal.wait())
            .await
            .is_err();
        assert!(timed_out);
    }
}
