//! Connection event sink
//!
//! The manager reports lifecycle changes and inbound frames to a
//! [`ConnectionHandler`] trait object, which can be swapped at any time.

use crate::error::ConnectError;
use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::warn;

/// Receiver of connection events
///
/// `on_message` is called from the inbound loop thread; the other callbacks
/// from whichever thread drove the lifecycle change.
pub trait ConnectionHandler: Send + Sync {
    fn on_connected(&self);

    fn on_disconnected(&self);

    /// One call per received frame, in arrival order
    fn on_message(&self, frame: Bytes);

    fn on_error(&self, error: &ConnectError) {
        let _ = error;
    }
}

/// Handler that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl ConnectionHandler for NoopHandler {
    fn on_connected(&self) {}
    fn on_disconnected(&self) {}
    fn on_message(&self, _frame: Bytes) {}
}

/// Connection events as values
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
    Message(Bytes),
    Error(ConnectError),
}

/// Handler that forwards every callback into an async channel
///
/// Lets async code consume events with `recv().await`.
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    tx: async_channel::Sender<ConnectionEvent>,
}

impl ChannelHandler {
    /// Create a handler and the receiving end of its event stream
    pub fn new() -> (Self, async_channel::Receiver<ConnectionEvent>) {
        let (tx, rx) = async_channel::unbounded();
        (Self { tx }, rx)
    }

    fn forward(&self, event: ConnectionEvent) {
        if let Err(e) = self.tx.try_send(event) {
            warn!("Dropping connection event, receiver gone: {}", e);
        }
    }
}

impl ConnectionHandler for ChannelHandler {
    fn on_connected(&self) {
        self.forward(ConnectionEvent::Connected);
    }

    fn on_disconnected(&self) {
        self.forward(ConnectionEvent::Disconnected);
    }

    fn on_message(&self, frame: Bytes) {
        self.forward(ConnectionEvent::Message(frame));
    }

    fn on_error(&self, error: &ConnectError) {
        self.forward(ConnectionEvent::Error(error.clone()));
    }
}

/// Replaceable handler shared by the manager and the transfer loops
pub(crate) struct HandlerSlot {
    handler: RwLock<Arc<dyn ConnectionHandler>>,
}

impl HandlerSlot {
    pub(crate) fn new(handler: Arc<dyn ConnectionHandler>) -> Self {
        Self {
            handler: RwLock::new(handler),
        }
    }

    /// Current handler; the lock is not held while the caller uses it
    pub(crate) fn get(&self) -> Arc<dyn ConnectionHandler> {
        self.handler.read().clone()
    }

    pub(crate) fn replace(&self, handler: Arc<dyn ConnectionHandler>) {
        *self.handler.write() = handler;
    }
}
