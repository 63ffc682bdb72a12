//! Zero-buffer hand-off between the scheduler and the workers.
//!
//! Each idle worker announces itself by sending a one-shot slot. The
//! producer waits for a slot and fills it, so `send` returns only once a
//! worker has taken the item. Nothing is ever queued.

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum HandoffError<T> {
    #[error("hand-off cancelled")]
    Cancelled(T),

    #[error("no receiver left")]
    Closed(T),
}

pub struct HandoffSender<T> {
    ready: mpsc::Receiver<oneshot::Sender<T>>,
}

pub struct HandoffReceiver<T> {
    ready: mpsc::Sender<oneshot::Sender<T>>,
}

impl<T> Clone for HandoffReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            ready: self.ready.clone(),
        }
    }
}

pub fn handoff<T>() -> (HandoffSender<T>, HandoffReceiver<T>) {
    let (tx, rx) = mpsc::channel(1);
    (HandoffSender { ready: rx }, HandoffReceiver { ready: tx })
}

impl<T> HandoffSender<T> {
    /// Blocks until a receiver accepts `item` or `cancel` fires.
    pub async fn send(&mut self, item: T, cancel: &CancellationToken) -> Result<(), HandoffError<T>> {
        let mut item = item;
        loop {
            let slot = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(HandoffError::Cancelled(item)),
                slot = self.ready.recv() => slot,
            };
            let Some(slot) = slot else {
                return Err(HandoffError::Closed(item));
            };
            match slot.send(item) {
                Ok(()) => return Ok(()),
                // That receiver went away, wait for the next one
                Err(returned) => item = returned,
            }
        }
    }
}

impl<T> HandoffReceiver<T> {
    /// Waits for the next item. Returns `None` once the sender is gone.
    pub async fn recv(&self) -> Option<T> {
        let (slot, item) = oneshot::channel();
        self.ready.send(slot).await.ok()?;
        item.await.ok()
    }
}
