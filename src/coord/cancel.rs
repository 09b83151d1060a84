//! Cooperative cancellation for a running plan
//!
//! Cancelling only stops new dispatches; handler calls already in flight run
//! to completion.

use tokio::sync::watch;

/// Caller side: request cancellation of a run
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: std::sync::Arc<watch::Sender<bool>>,
}

/// Scheduler side: observe cancellation requests
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

/// Create a connected handle/signal pair
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (
        CancelHandle {
            tx: std::sync::Arc::new(tx),
        },
        CancelSignal { rx },
    )
}

impl CancelHandle {
    pub fn cancel(&self) {
        // send_replace succeeds even when no signal is alive anymore
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl CancelSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        cancel_pair().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Never resolves if every
    /// handle was dropped without cancelling.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
