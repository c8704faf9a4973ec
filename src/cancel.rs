use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

/// Shared stop flag with an interruptible sleep.
///
/// Cloning shares the same flag. Any holder may cancel; both loops use
/// [`CancellationToken::wait`] as their only suspension point.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and wake every pending waiter. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent cancel is not missed.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Sleep for `duration` or until cancelled, whichever comes first.
    /// Returns `true` when the token is cancelled.
    pub async fn wait(&self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        tokio::select! {
            _ = self.cancelled() => true,
            _ = tokio::time::sleep(duration) => self.is_cancelled(),
        }
    }
}

/// Time left in a cycle of `interval` after `elapsed` of work. A cycle that
/// overran waits a full interval instead of spinning.
pub fn remaining_wait(interval: Duration, elapsed: Duration) -> Duration {
    if elapsed >= interval {
        interval
    } else {
        interval - elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[test]
    fn test_remaining_wait() {
        let interval = Duration::from_secs(60);
        assert_eq!(remaining_wait(interval, Duration::from_secs(15)), Duration::from_secs(45));
        assert_eq!(remaining_wait(interval, Duration::from_secs(60)), interval);
        assert_eq!(remaining_wait(interval, Duration::from_secs(95)), interval);
    }

    #[tokio::test]
    async fn test_wait_elapses_without_cancel() {
        let token = CancellationToken::new();
        let start = Instant::now();
        assert!(!token.wait(Duration::from_millis(20)).await);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_wait() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            let start = Instant::now();
            let cancelled = waiter.wait(Duration::from_secs(30)).await;
            (cancelled, start.elapsed())
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let (cancelled, elapsed) = handle.await.unwrap();
        assert!(cancelled);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_already_cancelled_returns_immediately() {
        let token = CancellationToken::new();
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
        assert!(token.wait(Duration::from_secs(30)).await);
        token.cancelled().await;
    }
}
