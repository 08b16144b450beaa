use std::sync::Arc;
use tokio::sync::watch;

/// Cooperative cancellation flag shared between the orchestrator and an
/// in-flight agent invocation.
///
/// Once cancelled it stays cancelled. Backends and tool adapters either race
/// their work against [`CancellationSignal::cancelled`] or poll
/// [`CancellationSignal::is_cancelled`] before starting blocking work.
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancellationSignal {
    /// Creates a signal in the not-cancelled state.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as any clone of this signal, so the
        // receiver can only error after we are gone.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancellationSignal {
    fn default() -> Self {
        Self::new()
    }
}
