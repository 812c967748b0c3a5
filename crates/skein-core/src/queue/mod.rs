//! Ready Queue -- FIFO transport of task ids eligible to run.
//!
//! Thin transport, not a source of truth: a crash between `pop` and a
//! worker's terminal write can redeliver the same id, which the claim step
//! (optimistic-lock CAS in the Task Store) tolerates. `push`/`pop` deliver
//! at-least-once under competing consumers.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A FIFO queue of ready task ids, shared across the Worker Pool.
///
/// Cloning shares the same underlying channel: every clone can `push`, and
/// every clone can `pop` (competing consumers draw from the single receiver
/// behind a mutex).
#[derive(Clone)]
pub struct ReadyQueue {
    tx: mpsc::UnboundedSender<Uuid>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Uuid>>>,
}

impl ReadyQueue {
    /// Create a new, empty queue.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Push a task id. Never blocks; fails only if every receiver has been
    /// dropped, which does not happen while any `ReadyQueue` clone is alive.
    pub fn push(&self, task_id: Uuid) {
        // An unbounded sender only errs if the paired receiver is gone; a
        // live `ReadyQueue` always holds one, so a push can't fail here.
        let _ = self.tx.send(task_id);
    }

    /// Pop the next ready task id, blocking until one is available or
    /// `cancel` is triggered. Returns `None` on cancellation or if the
    /// queue has been closed.
    pub async fn pop(&self, cancel: &CancellationToken) -> Option<Uuid> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            id = rx.recv() => id,
            _ = cancel.cancelled() => None,
        }
    }
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}
