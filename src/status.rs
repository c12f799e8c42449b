//! Last known value per group address.

use std::collections::BTreeMap;
use std::time::SystemTime;

use dashmap::DashMap;

use crate::addressing::{GroupAddress, IndividualAddress};
use crate::protocol::cemi::{Apci, CemiFrame};

/// Last value seen on the bus for one group address
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatusData {
    /// Raw value bytes (embedded six-bit values become one byte)
    pub value: Vec<u8>,
    /// Device that sent the value
    pub source: IndividualAddress,
    /// Service that carried the value
    pub apci: Apci,
    /// Receive time
    pub received_at: SystemTime,
    dirty: bool,
}

impl StatusData {
    /// Check if the value changed since it was last read
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

/// Status cache written by the inbound path
#[derive(Debug, Default)]
pub struct StatusPool {
    entries: DashMap<GroupAddress, StatusData>,
}

impl StatusPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a group value carried by `cemi`
    ///
    /// Only `GroupValueWrite` and `GroupValueResponse` addressed to a group
    /// update the pool. Returns the updated address.
    pub fn update(&self, cemi: &CemiFrame) -> Option<GroupAddress> {
        let apci = cemi.apci.filter(|apci| apci.carries_group_value())?;
        let address = cemi.destination_group()?;

        self.entries.insert(
            address,
            StatusData {
                value: cemi.value(),
                source: cemi.source,
                apci,
                received_at: SystemTime::now(),
                dirty: true,
            },
        );
        Some(address)
    }

    /// Current data for `address`, clearing its dirty flag
    ///
    /// The returned copy still reports whether it was dirty before the read.
    pub fn read(&self, address: GroupAddress) -> Option<StatusData> {
        let mut entry = self.entries.get_mut(&address)?;
        let data = entry.value().clone();
        entry.dirty = false;
        Some(data)
    }

    /// Current data for `address` without touching the dirty flag
    pub fn peek(&self, address: GroupAddress) -> Option<StatusData> {
        self.entries.get(&address).map(|entry| entry.value().clone())
    }

    /// Copy of every entry ordered by address
    pub fn snapshot(&self) -> BTreeMap<GroupAddress, StatusData> {
        self.entries
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Number of addresses with a known value
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no value has been recorded yet
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
