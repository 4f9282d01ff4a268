/// Run-scoped cooperative cancellation token.
///
/// Raised once (Ctrl-C or programmatic), observed at the admission-pool wait
/// and at the between-phases check. Cancellation is never forced: a module
/// that ignores the token keeps its slot until it returns on its own.

use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the signal and wakes every pending `cancelled()` wait.
    /// Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(SeqCst)
    }

    /// Resolves once the signal has been raised. Returns immediately if it
    /// already was.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register the waiter before the final flag check so a cancel()
            // landing in between cannot be missed.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[test]
    fn test_starts_unset() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let token = CancelToken::new();
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_clones_share_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_returns_immediately_when_set() {
        let token = CancelToken::new();
        token.cancel();
        timeout(Duration::from_millis(100), token.cancelled())
            .await
            .expect("cancelled() should resolve without waiting");
    }

    #[tokio::test]
    async fn test_cancelled_wakes_on_signal() {
        let token = CancelToken::new();
        let waiter = token.clone();

        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter should wake after cancel")
            .unwrap();
    }
}
