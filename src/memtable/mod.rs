//! # Memtable Module
//!
//! The mutable, in-memory layer of the engine.
//!
//! A [`MemTable`] is a sorted map from key to the latest [`Value`] written
//! for it: writing a key twice keeps only the second version. Deletes are
//! stored as tombstones so they can shadow older versions held in on-disk
//! segments.
//!
//! The table keeps an approximate byte size that the engine compares
//! against its flush threshold. The estimate counts keys, payloads and
//! timestamps; it is not the exact size of the serialized segment.
//!
//! The memtable is volatile. Its contents become durable only once the
//! engine flushes it to an [`SSTable`](crate::sstable::SSTable).

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::ops::Bound;

use tracing::trace;

use crate::engine::utils::{HexKey, next_timestamp};
use crate::engine::{Cell, CellIter, Table, TableError, Value};

/// Bytes accounted for the timestamp of every distinct key.
pub(crate) const TIMESTAMP_SIZE: u64 = std::mem::size_of::<i64>() as u64;

/// Size accounted for an empty table.
pub(crate) const BASE_SIZE: u64 = std::mem::size_of::<BTreeMap<Vec<u8>, Value>>() as u64;

/// An in-memory sorted table of the latest version of every key.
#[derive(Debug)]
pub struct MemTable {
    /// Ordered key → latest version mapping.
    map: BTreeMap<Vec<u8>, Value>,

    /// Approximate footprint used to trigger flushes.
    size_in_bytes: u64,
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MemTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            map: BTreeMap::new(),
            size_in_bytes: BASE_SIZE,
        }
    }

    /// Number of distinct keys, tombstones included.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Approximate size of the table in bytes.
    pub fn size_in_bytes(&self) -> u64 {
        self.size_in_bytes
    }

    /// Returns the version stored for `key`, tombstones included.
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.map.get(key)
    }

    /// Lazily iterates the cells with keys `>= from` in ascending order.
    pub fn iter<'a>(&'a self, from: &[u8]) -> impl Iterator<Item = Cell> + use<'a> {
        self.map
            .range::<[u8], _>((Bound::Included(from), Bound::Unbounded))
            .map(|(key, value)| Cell::new(key.clone(), value.clone()))
    }

    /// Stores `value` under `key` and adjusts the size estimate.
    ///
    /// A key seen for the first time is charged its length plus the
    /// timestamp; replacing a live value refunds the old payload.
    fn insert(&mut self, key: &[u8], value: Value) {
        let added = value.data().map_or(0, |d| d.len() as u64);

        match self.map.insert(key.to_vec(), value) {
            None => {
                self.size_in_bytes += key.len() as u64 + TIMESTAMP_SIZE;
            }
            Some(previous) => {
                let refunded = previous.data().map_or(0, |d| d.len() as u64);
                self.size_in_bytes -= refunded;
            }
        }

        self.size_in_bytes += added;
    }
}

impl Table for MemTable {
    fn iter_from(&self, from: &[u8]) -> Result<CellIter<'_>, TableError> {
        Ok(Box::new(self.iter(from).map(Ok)))
    }

    fn upsert(&mut self, key: &[u8], value: &[u8]) -> Result<(), TableError> {
        let value = Value::live(next_timestamp(), value)?;
        trace!(
            key = %HexKey(key),
            timestamp = value.timestamp(),
            "memtable upsert"
        );
        self.insert(key, value);
        Ok(())
    }

    fn remove(&mut self, key: &[u8]) -> Result<(), TableError> {
        let value = Value::tombstone(next_timestamp())?;
        trace!(
            key = %HexKey(key),
            timestamp = value.timestamp(),
            "memtable remove"
        );
        self.insert(key, value);
        Ok(())
    }

    fn close(&mut self) -> Result<(), TableError> {
        self.map.clear();
        self.size_in_bytes = BASE_SIZE;
        Ok(())
    }
}
