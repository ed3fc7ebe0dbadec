//! Correlation tables for awaited control packets.
//!
//! Client-initiated flows (publish acks, SUBACK, UNSUBACK) live in the
//! active table by packet identifier; broker-initiated flows (PUBREL for
//! inbound QoS 2) live in the passive table. CONNECT, AUTH and ping do
//! not carry identifiers and get dedicated slots.

use crate::error::{MqttError, Result};
use mqtt45_protocol::Packet;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::oneshot;

pub(crate) type Completer = oneshot::Sender<Result<Packet>>;
pub(crate) type Completion = oneshot::Receiver<Result<Packet>>;

#[derive(Default)]
pub(crate) struct PendingTables {
    active: Mutex<HashMap<u16, Completer>>,
    passive: Mutex<HashMap<u16, Completer>>,
    connect: Mutex<Option<Completer>>,
    auth: Mutex<Option<Completer>>,
    ping: Mutex<Option<Completer>>,
}

impl PendingTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a client-initiated flow. A new entry for the same
    /// identifier displaces the old one without resolving it; the
    /// broker's next response correlates to the newest request.
    pub fn register_active(&self, packet_id: u16) -> Completion {
        let (tx, rx) = oneshot::channel();
        self.active.lock().insert(packet_id, tx);
        rx
    }

    pub fn register_passive(&self, packet_id: u16) -> Completion {
        let (tx, rx) = oneshot::channel();
        self.passive.lock().insert(packet_id, tx);
        rx
    }

    pub fn register_connect(&self) -> Completion {
        let (tx, rx) = oneshot::channel();
        *self.connect.lock() = Some(tx);
        rx
    }

    pub fn register_auth(&self) -> Completion {
        let (tx, rx) = oneshot::channel();
        *self.auth.lock() = Some(tx);
        rx
    }

    pub fn register_ping(&self) -> Completion {
        let (tx, rx) = oneshot::channel();
        *self.ping.lock() = Some(tx);
        rx
    }

    /// Resolves an active entry. Returns false when no completer was
    /// registered for the identifier (an orphan acknowledgement).
    pub fn resolve_active(&self, packet_id: u16, result: Result<Packet>) -> bool {
        match self.active.lock().remove(&packet_id) {
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    pub fn resolve_passive(&self, packet_id: u16, result: Result<Packet>) -> bool {
        match self.passive.lock().remove(&packet_id) {
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    pub fn resolve_connect(&self, result: Result<Packet>) -> bool {
        match self.connect.lock().take() {
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    pub fn resolve_auth(&self, result: Result<Packet>) -> bool {
        match self.auth.lock().take() {
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    pub fn resolve_ping(&self, result: Result<Packet>) -> bool {
        match self.ping.lock().take() {
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    /// Drops an entry without resolving it (flow abandoned locally).
    pub fn cancel_active(&self, packet_id: u16) {
        self.active.lock().remove(&packet_id);
    }

    pub fn cancel_ping(&self) {
        self.ping.lock().take();
    }

    /// Resolves every outstanding completer with the close error, each
    /// exactly once.
    pub fn clear_all(&self, error: &MqttError) {
        for (_, tx) in self.active.lock().drain() {
            let _ = tx.send(Err(error.clone()));
        }
        for (_, tx) in self.passive.lock().drain() {
            let _ = tx.send(Err(error.clone()));
        }
        if let Some(tx) = self.connect.lock().take() {
            let _ = tx.send(Err(error.clone()));
        }
        if let Some(tx) = self.auth.lock().take() {
            let _ = tx.send(Err(error.clone()));
        }
        if let Some(tx) = self.ping.lock().take() {
            let _ = tx.send(Err(error.clone()));
        }
    }
}
