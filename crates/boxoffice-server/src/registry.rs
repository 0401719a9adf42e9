//! Connection table.
//!
//! Stream connections carry one request each, but while one is being served
//! it holds a slot. The table has a fixed number of slots; a connection
//! arriving when all are taken is refused outright. Slots are reused lowest
//! first.

use std::{collections::HashMap, net::SocketAddr};

/// Information about an admitted connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Id assigned by the driver
    pub connection_id: u64,
    /// Remote address
    pub peer: SocketAddr,
}

/// Bounded table of admitted stream connections.
#[derive(Debug)]
pub struct ConnectionTable {
    /// Slot → occupant
    slots: Vec<Option<ConnectionInfo>>,
    /// Connection ID → slot (reverse index)
    by_id: HashMap<u64, usize>,
}

impl ConnectionTable {
    /// Creates a table with `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        Self { slots: vec![None; capacity], by_id: HashMap::new() }
    }

    /// Admits a connection into the lowest free slot.
    ///
    /// Returns `None` if every slot is taken or the id is already admitted.
    pub fn admit(&mut self, connection_id: u64, peer: SocketAddr) -> Option<usize> {
        if self.by_id.contains_key(&connection_id) {
            return None;
        }
        let slot = self.slots.iter().position(Option::is_none)?;
        self.slots[slot] = Some(ConnectionInfo { connection_id, peer });
        self.by_id.insert(connection_id, slot);
        Some(slot)
    }

    /// Frees the slot held by `connection_id`.
    pub fn release(&mut self, connection_id: u64) -> Option<ConnectionInfo> {
        let slot = self.by_id.remove(&connection_id)?;
        self.slots.get_mut(slot)?.take()
    }

    /// Occupant info. `None` if the connection is not admitted.
    pub fn get(&self, connection_id: u64) -> Option<&ConnectionInfo> {
        let slot = *self.by_id.get(&connection_id)?;
        self.slots.get(slot)?.as_ref()
    }

    /// Check if a connection is admitted.
    pub fn contains(&self, connection_id: u64) -> bool {
        self.by_id.contains_key(&connection_id)
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Check if no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
