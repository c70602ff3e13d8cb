//! Single-use close latches
//!
//! Stream release, session shutdown and event-sink closing may each be
//! requested from more than one place. `CloseOnce` makes the first request
//! win and turns every later one into an observable no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A latch that can be closed exactly once.
#[derive(Debug, Default)]
pub struct CloseOnce {
    closed: AtomicBool,
    token: CancellationToken,
}

impl CloseOnce {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the latch. Returns `true` only for the call that actually closed it.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.token.cancel();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves once the latch has been closed.
    pub async fn closed(&self) {
        self.token.cancelled().await;
    }
}

/// Process-wide shutdown request, shared by the runtime and the Ctrl-C handler.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    latch: Arc<CloseOnce>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Idempotent; returns whether this call was the first.
    pub fn trigger(&self) -> bool {
        let first = self.latch.close();
        if first {
            tracing::info!("Shutdown requested");
        } else {
            tracing::debug!("Shutdown already requested, ignoring");
        }
        first
    }

    pub fn is_triggered(&self) -> bool {
        self.latch.is_closed()
    }

    pub async fn wait(&self) {
        self.latch.closed().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_close_once_reports_first_closer() {
        let latch = CloseOnce::new();
        assert!(!latch.is_closed());
        assert!(latch.close());
        assert!(!latch.close());
        assert!(latch.is_closed());
    }

    #[tokio::test]
    async fn test_closed_resolves_after_close() {
        let latch = Arc::new(CloseOnce::new());
        let waiter = {
            let latch = latch.clone();
            tokio::spawn(async move { latch.closed().await })
        };
        latch.close();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_is_shared_across_clones() {
        let shutdown = Shutdown::new();
        let other = shutdown.clone();
        assert!(other.trigger());
        assert!(!shutdown.trigger());
        assert!(shutdown.is_triggered());
        tokio::time::timeout(Duration::from_secs(1), shutdown.wait())
            .await
            .expect("already triggered");
    }
}
