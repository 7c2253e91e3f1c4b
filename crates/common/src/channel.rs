//! Outbound frame queue between callers and the outbound transfer loop
//!
//! An unbounded FIFO: callers push from any thread without blocking, the
//! outbound loop awaits the next frame. Waiting on [`QueueReceiver::recv`]
//! is cancel-safe, so racing it against a shutdown signal never loses a
//! frame that was already queued.

use async_channel::{Receiver, Sender, unbounded};
use bytes::Bytes;

/// Unbounded FIFO of pending outbound frames
///
/// Owned by the connection manager for its whole lifetime; frames queued
/// while no outbound loop is running stay queued until the next teardown.
#[derive(Debug)]
pub struct OutboundQueue {
    tx: Sender<Bytes>,
    rx: Receiver<Bytes>,
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl OutboundQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Enqueue a frame (never blocks)
    pub fn push(&self, frame: Bytes) -> crate::Result<()> {
        self.tx
            .try_send(frame)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Handle for the consuming side
    pub fn receiver(&self) -> QueueReceiver {
        QueueReceiver {
            rx: self.rx.clone(),
        }
    }

    /// Number of frames waiting to be sent
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether no frames are waiting
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Discard every pending frame, returning how many were dropped
    pub fn clear(&self) -> usize {
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }
}

/// Consuming side of an [`OutboundQueue`]
#[derive(Debug, Clone)]
pub struct QueueReceiver {
    rx: Receiver<Bytes>,
}

impl QueueReceiver {
    /// Wait for the next frame
    pub async fn recv(&self) -> crate::Result<Bytes> {
        self.rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}
