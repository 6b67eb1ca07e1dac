//! A single cooperative cancellation signal shared by every HTTP request and
//! worker task in an ingestion run (spec.md §5).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Cheaply cloneable; all clones observe the same underlying trip.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    tripped: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            tripped: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Trip the token. Idempotent; wakes every pending `cancelled()` waiter.
    pub fn cancel(&self) {
        if !self.tripped.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel()` has been called. Resolves immediately if
    /// already tripped, so it's safe to race against in a `select!`.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let notified = self.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
