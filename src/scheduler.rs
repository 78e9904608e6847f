//! Timer abstraction behind backoff delays and poll-interval waits.
//!
//! Production code sleeps on the tokio timer. [`VirtualScheduler`] records
//! requested waits and returns at once, so retry and polling logic can be
//! exercised against a virtual clock.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

/// Something that can suspend the current task for a while.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real wall-clock waits via `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

#[async_trait]
impl Scheduler for TokioScheduler {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// Virtual clock: every wait is recorded and completes immediately.
#[derive(Debug, Default)]
pub struct VirtualScheduler {
    sleeps: Mutex<Vec<Duration>>,
}

impl VirtualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Virtual time that has passed.
    pub fn elapsed(&self) -> Duration {
        self.sleeps().iter().sum()
    }
}

#[async_trait]
impl Scheduler for VirtualScheduler {
    async fn sleep(&self, duration: Duration) {
        self.sleeps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(duration);
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn virtual_scheduler_records_waits() {
        let scheduler = VirtualScheduler::new();
        scheduler.sleep(Duration::from_secs(2)).await;
        scheduler.sleep(Duration::from_millis(500)).await;

        assert_eq!(
            scheduler.sleeps(),
            vec![Duration::from_secs(2), Duration::from_millis(500)]
        );
        assert_eq!(scheduler.elapsed(), Duration::from_millis(2500));
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_scheduler_advances_paused_clock() {
        let start = tokio::time::Instant::now();
        TokioScheduler.sleep(Duration::from_secs(30)).await;
        assert!(start.elapsed() >= Duration::from_secs(30));
    }
}
