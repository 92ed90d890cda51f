//! Cooperative cancellation shared between the orchestrator and its tasks.
//!
//! One writer ([`CancellationSignal`]) and any number of read-only
//! observers ([`ShutdownPredicate`]). Built on a `watch` channel so tasks can
//! either poll the flag or await its transition.

use tokio::sync::watch;
use tracing::trace;

/// Process-wide shutdown flag owned by the orchestrator.
///
/// `false` while idle or running, set once per stop request, and reset after
/// the stop sequence completes so the same signal serves repeated cycles.
#[derive(Debug)]
pub struct CancellationSignal {
    tx: watch::Sender<bool>,
}

impl CancellationSignal {
    /// Creates a signal in the cleared state.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Requests shutdown. Observers see the change on their next check.
    pub fn cancel(&self) {
        let was = self.tx.send_replace(true);
        trace!(was, observers = self.tx.receiver_count(), "cancellation requested");
    }

    /// Clears the flag.
    pub fn reset(&self) {
        if self.tx.send_replace(false) {
            trace!("cancellation cleared");
        }
    }

    /// Returns whether shutdown has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Returns a read-only view for a spawned task.
    #[must_use]
    pub fn predicate(&self) -> ShutdownPredicate {
        ShutdownPredicate {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for CancellationSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of a [`CancellationSignal`].
#[derive(Debug, Clone)]
pub struct ShutdownPredicate {
    rx: watch::Receiver<bool>,
}

impl ShutdownPredicate {
    /// Returns whether shutdown has been requested.
    #[must_use]
    pub fn is_set(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested.
    ///
    /// Also resolves if the owning signal is dropped, since nothing can
    /// clear the request afterwards.
    pub async fn cancelled(&mut self) {
        let _ = self.rx.wait_for(|cancelled| *cancelled).await;
    }
}
