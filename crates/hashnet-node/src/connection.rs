//! Connection table -- slot-indexed arena of direct links.
//!
//! Slot numbers start at 1 (0 in a route label means "deliver here").
//! Removal leaves a tombstone; admission takes the lowest free slot.
//! Each entry also carries a link id so that a stale close event from a
//! previous occupant cannot evict the link now holding the slot.

use std::sync::Arc;

use hashnet_protocol::{ConnectionEntry, PeerId, RouteLabel};

use crate::transport::Transport;

/// Connection slot number, 1-based.
pub type Slot = usize;

pub struct Connection {
    pub slot: Slot,
    pub link_id: u64,
    pub transport: Arc<dyn Transport>,
    pub id: Option<PeerId>,
    /// Round-trip time in milliseconds from the latest probe.
    pub rtt_ms: Option<u64>,
}

/// Snapshot of one connection for callers outside the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub slot: Slot,
    pub id: Option<PeerId>,
    pub rtt_ms: Option<u64>,
}

impl Connection {
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            slot: self.slot,
            id: self.id,
            rtt_ms: self.rtt_ms,
        }
    }
}

pub struct ConnectionTable {
    slots: Vec<Option<Connection>>,
    max: usize,
}

impl ConnectionTable {
    pub fn new(max: usize) -> Self {
        Self {
            slots: Vec::with_capacity(max),
            max,
        }
    }

    pub fn capacity(&self) -> usize {
        self.max
    }

    /// Live connection count.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|c| c.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lowest free slot, or `None` when all `max` slots are live.
    fn free_slot(&self) -> Option<Slot> {
        if let Some(index) = self.slots.iter().position(|c| c.is_none()) {
            return Some(index + 1);
        }
        (self.slots.len() < self.max).then(|| self.slots.len() + 1)
    }

    /// Register a link in the lowest free slot. `None` when full; the table
    /// is left untouched.
    pub fn insert(
        &mut self,
        transport: Arc<dyn Transport>,
        id: Option<PeerId>,
        link_id: u64,
    ) -> Option<Slot> {
        let slot = self.free_slot()?;
        let connection = Connection {
            slot,
            link_id,
            transport,
            id,
            rtt_ms: None,
        };
        if slot > self.slots.len() {
            self.slots.push(Some(connection));
        } else {
            self.slots[slot - 1] = Some(connection);
        }
        Some(slot)
    }

    /// Remove the link in `slot` if it is still `link_id`.
    pub fn remove(&mut self, slot: Slot, link_id: u64) -> Option<Connection> {
        let entry = self.slots.get_mut(slot.checked_sub(1)?)?;
        if entry.as_ref().is_some_and(|c| c.link_id == link_id) {
            return entry.take();
        }
        None
    }

    pub fn get(&self, slot: Slot) -> Option<&Connection> {
        self.slots.get(slot.checked_sub(1)?)?.as_ref()
    }

    /// Connection in `slot` only if it is still `link_id`.
    pub fn get_link(&self, slot: Slot, link_id: u64) -> Option<&Connection> {
        self.get(slot).filter(|c| c.link_id == link_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.slots.iter().flatten()
    }

    /// Record a probe result for the link in `slot`.
    pub fn record_probe(&mut self, slot: Slot, link_id: u64, id: PeerId, rtt_ms: u64) -> bool {
        let Some(Some(conn)) = slot.checked_sub(1).and_then(|i| self.slots.get_mut(i)) else {
            return false;
        };
        if conn.link_id != link_id {
            return false;
        }
        conn.id = Some(id);
        conn.rtt_ms = Some(rtt_ms);
        true
    }

    /// `discovery.connection` rows: one-hop label per live slot.
    pub fn entries(&self, field_bits: usize) -> Vec<ConnectionEntry> {
        self.iter()
            .map(|c| ConnectionEntry {
                id: c.id,
                route_label: RouteLabel::hop(c.slot as u64, field_bits),
                rtt: c.rtt_ms,
            })
            .collect()
    }

    /// Empty the table, returning every live connection.
    pub fn drain(&mut self) -> Vec<Connection> {
        self.slots.drain(..).flatten().collect()
    }
}
