//! Coordinated graceful-shutdown signal shared across long-lived tasks.
//!
//! The HTTP server's own graceful-shutdown future only stops `axum::serve`
//! from accepting new connections. Long-lived SSE write loops (spec.md
//! §4.7, §5 "Cancellation") need to notice shutdown directly so they can
//! stop selecting on their subscriber channel and tear down within the
//! configured drain window rather than waiting for the socket to error out.

use std::sync::Arc;
use tokio::sync::watch;

/// Cloneable handle to a process-wide shutdown flag.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    /// Signal every holder of this handle (and every `subscribe()`d
    /// receiver) that shutdown has begun. Idempotent.
    pub fn signal(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.rx.borrow()
    }

    /// Get an independent receiver, e.g. to `select!` on inside a write loop.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.rx.clone()
    }

    /// Resolve once shutdown has been signaled.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_signal_wakes_waiters() {
        let handle = ShutdownHandle::new();
        assert!(!handle.is_shutting_down());

        let waiter = handle.clone();
        let task = tokio::spawn(async move {
            waiter.wait().await;
        });

        handle.signal();
        task.await.unwrap();
        assert!(handle.is_shutting_down());
    }

    #[test]
    fn test_clone_shares_state() {
        let handle = ShutdownHandle::new();
        let clone = handle.clone();
        handle.signal();
        assert!(clone.is_shutting_down());
    }
}
