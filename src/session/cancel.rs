//! Cancellation of an in-flight session start

use std::sync::Arc;

use tokio::sync::watch;

/// Sticky cancellation flag shared between a start and whoever may abandon it
///
/// Cancelling before anyone waits is not lost.
#[derive(Debug, Clone)]
pub struct StartCancel {
    flag: Arc<watch::Sender<bool>>,
}

impl Default for StartCancel {
    fn default() -> Self {
        Self::new()
    }
}

impl StartCancel {
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self { flag: Arc::new(flag) }
    }

    pub fn cancel(&self) {
        self.flag.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.flag.borrow()
    }

    /// Resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        let mut rx = self.flag.subscribe();
        // The sender lives in `self`, so this only returns once the flag is set
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Guard that cancels on drop unless disarmed
    pub fn drop_guard(&self) -> CancelOnDrop {
        CancelOnDrop(Some(self.clone()))
    }
}

/// Cancels its [`StartCancel`] when dropped
#[derive(Debug)]
pub struct CancelOnDrop(Option<StartCancel>);

impl CancelOnDrop {
    pub fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(cancel) = self.0.take() {
            cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_before_wait_is_seen() {
        let cancel = StartCancel::new();
        cancel.cancel();
        assert!(cancel.is_cancelled());
        tokio::time::timeout(Duration::from_secs(1), cancel.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancel_wakes_waiter() {
        let cancel = StartCancel::new();
        let waiter = tokio::spawn({
            let cancel = cancel.clone();
            async move { cancel.cancelled().await }
        });

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_drop_guard() {
        let cancel = StartCancel::new();
        drop(cancel.drop_guard());
        assert!(cancel.is_cancelled());

        let kept = StartCancel::new();
        kept.drop_guard().disarm();
        assert!(!kept.is_cancelled());
    }
}
