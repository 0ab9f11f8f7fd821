//! Send-side cooldown pacing.
//!
//! Endpoints rate-limit bots; the pacer enforces a minimum interval
//! between consecutive outbound writes: `max(0, cd_time - since_last)`.

use std::time::Duration;

use tokio::time::Instant;

/// Paces consecutive outbound writes.
#[derive(Debug)]
pub struct OutputPacer {
    cd_time: Duration,
    last_send: Option<Instant>,
}

impl OutputPacer {
    /// A pacer with the given cooldown interval.
    pub fn new(cd_time: Duration) -> Self {
        Self {
            cd_time,
            last_send: None,
        }
    }

    /// Sleeps out the remaining cooldown, if any.
    pub async fn pace(&mut self) {
        if let Some(last) = self.last_send {
            let wait = self.cd_time.saturating_sub(last.elapsed());
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
        }
    }

    /// Records a completed write as the new cooldown reference.
    pub fn mark_sent(&mut self) {
        self.last_send = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_send_is_immediate() {
        let mut pacer = OutputPacer::new(Duration::from_millis(200));
        let before = Instant::now();
        pacer.pace().await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_sends_wait_out_cooldown() {
        let mut pacer = OutputPacer::new(Duration::from_millis(200));
        pacer.pace().await;
        pacer.mark_sent();

        let before = Instant::now();
        pacer.pace().await;
        assert!(before.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_cooldown_does_not_wait() {
        let mut pacer = OutputPacer::new(Duration::from_millis(200));
        pacer.pace().await;
        pacer.mark_sent();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let before = Instant::now();
        pacer.pace().await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }
}
