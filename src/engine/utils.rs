//! Engine utilities: versioned values, cells, and merge primitives.
//!
//! This module defines:
//!
//! - [`Value`]: a timestamped payload or tombstone.
//! - [`Cell`]: a key paired with a [`Value`]; the unit every layer stores
//!   and every merge compares.
//! - [`MergeIterator`]: a heap-based k-way merge that combines sorted cell
//!   streams into a single stream in `(key ASC, timestamp DESC)` order.
//! - [`next_timestamp`]: the monotonic write clock.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};
use std::time::{SystemTime, UNIX_EPOCH};

use super::table::{CellIter, TableError};

// ------------------------------------------------------------------------------------------------
// Write clock
// ------------------------------------------------------------------------------------------------

static LAST_TIMESTAMP: AtomicI64 = AtomicI64::new(0);

/// Returns a strictly positive write timestamp in nanoseconds since the UNIX
/// epoch.
///
/// Successive calls within the process never return the same value, even if
/// the wall clock stalls or steps backwards.
pub fn next_timestamp() -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default();

    let mut last = LAST_TIMESTAMP.load(AtomicOrdering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_TIMESTAMP.compare_exchange_weak(
            last,
            next,
            AtomicOrdering::AcqRel,
            AtomicOrdering::Relaxed,
        ) {
            Ok(_) => return next,
            Err(current) => last = current,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Value
// ------------------------------------------------------------------------------------------------

/// A timestamped version of a key: either a live payload or a tombstone.
///
/// Values order by timestamp **descending**, so the newest version of a key
/// sorts first.
#[derive(Debug, Clone)]
pub struct Value {
    timestamp: i64,
    data: Option<Vec<u8>>,
}

impl Value {
    /// Creates a live value.
    ///
    /// Fails with [`TableError::InvalidTimestamp`] if `timestamp <= 0`.
    pub fn live(timestamp: i64, data: impl Into<Vec<u8>>) -> Result<Self, TableError> {
        if timestamp <= 0 {
            return Err(TableError::InvalidTimestamp(timestamp));
        }
        Ok(Self {
            timestamp,
            data: Some(data.into()),
        })
    }

    /// Creates a tombstone.
    ///
    /// Fails with [`TableError::InvalidTimestamp`] if `timestamp <= 0`.
    pub fn tombstone(timestamp: i64) -> Result<Self, TableError> {
        if timestamp <= 0 {
            return Err(TableError::InvalidTimestamp(timestamp));
        }
        Ok(Self {
            timestamp,
            data: None,
        })
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn is_tombstone(&self) -> bool {
        self.data.is_none()
    }

    /// Returns the payload, or `None` for a tombstone.
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    pub fn into_data(self) -> Option<Vec<u8>> {
        self.data
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    /// Newer timestamps sort first.
    fn cmp(&self, other: &Self) -> Ordering {
        other.timestamp.cmp(&self.timestamp)
    }
}

// ------------------------------------------------------------------------------------------------
// Cell
// ------------------------------------------------------------------------------------------------

/// A key and one of its versions.
///
/// Cells are built while iterating or serializing and are never mutated; the
/// key is only handed out as a borrowed slice.
#[derive(Debug, Clone)]
pub struct Cell {
    key: Vec<u8>,
    value: Value,
}

impl Cell {
    pub fn new(key: impl Into<Vec<u8>>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_parts(self) -> (Vec<u8>, Value) {
        (self.key, self.value)
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.value == other.value
    }
}

impl Eq for Cell {}

impl PartialOrd for Cell {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cell {
    /// Compares by `(key ASC, timestamp DESC)`.
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| self.value.cmp(&other.value))
    }
}

// ------------------------------------------------------------------------------------------------
// MergeIterator: heap-based k-way merge over cell streams
// ------------------------------------------------------------------------------------------------

/// A heap-based merge iterator that yields [`Cell`]s from multiple sorted
/// sources in `(key ASC, timestamp DESC)` order.
///
/// Sources are given newest first; when two cells compare equal the one
/// from the lower source index wins. The first error produced by any source
/// is yielded in place of that source's next cell, after which the merge is
/// exhausted.
pub struct MergeIterator<'a> {
    iters: Vec<CellIter<'a>>,
    heap: BinaryHeap<MergeHeapEntry>,
    error: Option<TableError>,
    failed: bool,
}

struct MergeHeapEntry {
    cell: Cell,
    source_idx: usize,
}

impl Ord for MergeHeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap: reverse so smallest key / newest version pops first.
        self.cell
            .cmp(&other.cell)
            .then_with(|| self.source_idx.cmp(&other.source_idx))
            .reverse()
    }
}

impl PartialOrd for MergeHeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for MergeHeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeHeapEntry {}

impl<'a> MergeIterator<'a> {
    pub fn new(mut iters: Vec<CellIter<'a>>) -> Self {
        let mut heap = BinaryHeap::with_capacity(iters.len());
        let mut error = None;

        for (idx, iter) in iters.iter_mut().enumerate() {
            match iter.next() {
                Some(Ok(cell)) => heap.push(MergeHeapEntry {
                    cell,
                    source_idx: idx,
                }),
                Some(Err(e)) => {
                    error = Some(e);
                    break;
                }
                None => {}
            }
        }

        Self {
            iters,
            heap,
            error,
            failed: false,
        }
    }
}

impl Iterator for MergeIterator<'_> {
    type Item = Result<Cell, TableError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if let Some(e) = self.error.take() {
            self.failed = true;
            return Some(Err(e));
        }

        let entry = self.heap.pop()?;
        let idx = entry.source_idx;

        match self.iters[idx].next() {
            Some(Ok(next_cell)) => self.heap.push(MergeHeapEntry {
                cell: next_cell,
                source_idx: idx,
            }),
            // The popped cell still precedes anything the failed source
            // could have produced, so emit it and report the error next.
            Some(Err(e)) => self.error = Some(e),
            None => {}
        }

        Some(Ok(entry.cell))
    }
}

// ------------------------------------------------------------------------------------------------
// Tracing helper
// ------------------------------------------------------------------------------------------------

/// Renders a key as hex for trace output, truncating long keys.
pub(crate) struct HexKey<'a>(pub(crate) &'a [u8]);

impl std::fmt::Display for HexKey<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.len() <= 32 {
            for byte in self.0 {
                write!(f, "{:02x}", byte)?;
            }
        } else {
            for byte in &self.0[..16] {
                write!(f, "{:02x}", byte)?;
            }
            write!(f, "...[{} bytes]", self.0.len())?;
        }
        Ok(())
    }
}
