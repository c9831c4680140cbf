//! Shutdown coordination for graceful server shutdown.
//!
//! The transport stops accepting sockets once shutdown is initiated, the
//! room directory stops its actors, and the application marks shutdown
//! complete once everything has drained.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;

/// Shared shutdown state. Cheap to clone; all clones observe the same flags.
#[derive(Debug, Clone)]
pub struct ShutdownState {
    /// No new connections or rooms should be accepted.
    shutdown_initiated: Arc<AtomicBool>,
    /// Every room actor has stopped.
    shutdown_complete: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownState {
    pub fn new() -> Self {
        Self {
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            shutdown_complete: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    pub fn is_shutdown_complete(&self) -> bool {
        self.shutdown_complete.load(Ordering::Acquire)
    }

    /// Initiates shutdown and wakes every task parked in [`ShutdownState::wait_initiated`].
    pub fn initiate_shutdown(&self) {
        if !self.shutdown_initiated.swap(true, Ordering::AcqRel) {
            info!("🛑 Shutdown initiated - no new connections will be accepted");
        }
        self.notify.notify_waiters();
    }

    pub fn complete_shutdown(&self) {
        self.shutdown_complete.store(true, Ordering::Release);
        info!("✅ All rooms stopped - ready for final cleanup");
    }

    /// Resolves once shutdown has been initiated (immediately if it already was).
    pub async fn wait_initiated(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_shutdown_initiated() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for ShutdownState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_initiated_wakes_waiters() {
        let state = ShutdownState::new();
        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.wait_initiated().await })
        };

        tokio::task::yield_now().await;
        assert!(!state.is_shutdown_initiated());
        state.initiate_shutdown();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .expect("waiter task should not panic");
        assert!(state.is_shutdown_initiated());
        assert!(!state.is_shutdown_complete());
    }

    #[tokio::test]
    async fn test_wait_after_initiation_returns_immediately() {
        let state = ShutdownState::new();
        state.initiate_shutdown();
        state.wait_initiated().await;
        state.complete_shutdown();
        assert!(state.is_shutdown_complete());
    }
}
