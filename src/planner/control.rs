use std::sync::Arc;
use tokio::sync::watch;

/// Cancellation switch for one export run.
///
/// Cancelling stops the planner from issuing new live calls. Calls already
/// in flight finish and still populate the cache.
#[derive(Clone)]
pub struct RunControl {
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
}

impl RunControl {
    pub fn new() -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            cancel_tx: Arc::new(cancel_tx),
            cancel_rx,
        }
    }

    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Resolves once [`RunControl::cancel`] has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel_rx.clone();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}
