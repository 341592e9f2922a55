use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use hawkeye_proto::{Batch, ChangeMessage};
use tokio::sync::{mpsc, Mutex};
use tracing::info;

/// Channel of command frames waiting to be sent upstream.
///
/// Containers hold a clone and push into it; the connection driver awaits
/// [`Outbox::recv`] and writes each frame as soon as it is queued.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Batch>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Batch>>>,
    pending: Arc<AtomicUsize>,
}

impl Outbox {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queues `message` as a one-element command batch.
    pub fn request(&self, message: ChangeMessage) {
        info!(
            change = %message.change,
            rhtype = %message.resource_type,
            rhid = %message.resource_id,
            "client sending command"
        );
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(Batch::single(message)).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Waits for the next queued command. Cancel safe.
    pub async fn recv(&self) -> Option<Batch> {
        let batch = self.rx.lock().await.recv().await;
        if batch.is_some() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        batch
    }

    /// Takes everything queued right now without waiting. Returns nothing
    /// while a driver is parked in [`Outbox::recv`].
    pub fn drain(&self) -> Vec<Batch> {
        let Ok(mut rx) = self.rx.try_lock() else {
            return Vec::new();
        };
        let mut frames = Vec::new();
        while let Ok(batch) = rx.try_recv() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            frames.push(batch);
        }
        frames
    }

    pub fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Outbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox")
            .field("pending", &self.len())
            .finish()
    }
}
