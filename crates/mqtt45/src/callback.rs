//! Session notifications: a broadcast channel for observers plus an
//! optional single delegate. Both see the same events in the same order
//! because everything funnels through one dispatcher.

use crate::client::state::Status;
use crate::error::MqttError;
use mqtt45_protocol::Message;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum SessionEvent {
    StatusChanged { old: Status, new: Status },
    Message(Message),
    Error(MqttError),
}

/// Alternative to event-channel observation for embedders that prefer a
/// single callback object.
pub trait SessionDelegate: Send + Sync {
    fn on_status_changed(&self, _old: &Status, _new: &Status) {}
    fn on_message(&self, _message: &Message) {}
    fn on_error(&self, _error: &MqttError) {}
}

pub(crate) struct EventDispatcher {
    tx: broadcast::Sender<SessionEvent>,
    delegate: Mutex<Option<Arc<dyn SessionDelegate>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            tx,
            delegate: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub fn set_delegate(&self, delegate: Option<Arc<dyn SessionDelegate>>) {
        *self.delegate.lock() = delegate;
    }

    pub fn emit(&self, event: SessionEvent) {
        let delegate = self.delegate.lock().clone();
        if let Some(delegate) = delegate {
            match &event {
                SessionEvent::StatusChanged { old, new } => delegate.on_status_changed(old, new),
                SessionEvent::Message(message) => delegate.on_message(message),
                SessionEvent::Error(error) => delegate.on_error(error),
            }
        }
        // No receivers is fine; events are fire-and-forget.
        let _ = self.tx.send(event);
    }
}
