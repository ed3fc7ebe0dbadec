//! Inflight table for QoS >= 1 flows.
//!
//! An entry exists from the moment a PUBLISH (or its PUBREL
//! continuation) is first sent until the flow's terminal
//! acknowledgement. At most one entry per identifier: the PUBREL step of
//! a QoS 2 flow replaces the PUBLISH under the same key.

use mqtt45_protocol::Packet;
use parking_lot::Mutex;
use std::collections::BTreeMap;

#[derive(Default)]
pub(crate) struct InflightTable {
    entries: Mutex<BTreeMap<u16, Packet>>,
}

impl InflightTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, packet_id: u16, packet: Packet) {
        self.entries.lock().insert(packet_id, packet);
    }

    pub fn remove(&self, packet_id: u16) -> Option<Packet> {
        self.entries.lock().remove(&packet_id)
    }

    pub fn get(&self, packet_id: u16) -> Option<Packet> {
        self.entries.lock().get(&packet_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Snapshot in identifier order, used for retransmission on session
    /// resume.
    pub fn snapshot(&self) -> Vec<(u16, Packet)> {
        self.entries
            .lock()
            .iter()
            .map(|(id, packet)| (*id, packet.clone()))
            .collect()
    }
}
