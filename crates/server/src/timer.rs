use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinHandle;

/// A single-shot task slot with first-class cancellation.
///
/// Arming always cancels whatever was armed before, so at most one future is
/// pending per slot. Each match owns one of these for its update tick chain.
#[derive(Default)]
pub struct OneShot {
    handle: Option<JoinHandle<()>>,
}

impl OneShot {
    pub fn new() -> Self {
        Self { handle: None }
    }

    /// Cancel any pending task, then run `fut` after `delay`.
    pub fn arm(&mut self, delay: Duration, fut: Pin<Box<dyn Future<Output = ()> + Send>>) {
        self.cancel();
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fut.await;
        }));
    }

    /// Cancel the pending task, if any.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }
}

impl Drop for OneShot {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_fires_once() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut slot = OneShot::new();

        let counter = Arc::clone(&fired);
        slot.arm(
            Duration::from_millis(10),
            Box::pin(async move {
                counter.fetch_add(1, Ordering::Relaxed);
            }),
        );

        sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::Relaxed), 1);
        assert!(!slot.is_armed());
    }

    #[tokio::test]
    async fn test_rearm_cancels_previous() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut slot = OneShot::new();

        for _ in 0..3 {
            let counter = Arc::clone(&fired);
            slot.arm(
                Duration::from_millis(20),
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::Relaxed);
                }),
            );
        }

        sleep(Duration::from_millis(60)).await;
        // Only the last armed task survives.
        assert_eq!(fired.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_cancel_prevents_firing() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut slot = OneShot::new();

        let counter = Arc::clone(&fired);
        slot.arm(
            Duration::from_millis(10),
            Box::pin(async move {
                counter.fetch_add(1, Ordering::Relaxed);
            }),
        );
        slot.cancel();

        sleep(Duration::from_millis(40)).await;
        assert_eq!(fired.load(Ordering::Relaxed), 0);
        assert!(!slot.is_armed());
    }
}
