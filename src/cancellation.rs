//! A cheap cancellation signal, modeled on this codebase's own
//! `shutdown`/`shutdown_flag` pair in the event bus rather than pulling in
//! `tokio_util::sync::CancellationToken` for a single boolean + wakeup.
//!
//! Lives at the crate root rather than under `engine` so that `driver`, a
//! lower-level module `engine` depends on, can observe cancellation too.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// Cloneable handle shared between an `ExecutionEngine` supervisor, every
/// `TaskRunner` it dispatches for one execution, and the `BrowserDriver` call
/// each one is blocked inside.
#[derive(Clone)]
pub struct CancellationSignal {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationSignal {
    #[must_use]
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called; a no-op await if it already
    /// has, so callers can `select!` it without missing an already-set flag.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

impl Default for CancellationSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelled_resolves_immediately_once_flag_is_set() {
        let signal = CancellationSignal::new();
        signal.cancel();
        assert!(signal.is_cancelled());
        signal.cancelled().await;
    }

    #[tokio::test]
    async fn wakes_a_waiter_already_parked_on_cancelled() {
        let signal = CancellationSignal::new();
        let waiter = signal.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        tokio::task::yield_now().await;
        signal.cancel();
        handle.await.unwrap();
    }
}
