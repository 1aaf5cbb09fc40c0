//! The capability set shared by every storage layer.
//!
//! Both the in-memory [`MemTable`](crate::memtable::MemTable) and the on-disk
//! [`SSTable`](crate::sstable::SSTable) implement [`Table`]. The immutable
//! variant rejects mutation with [`TableError::Immutable`] instead of omitting
//! the methods, so code written against the trait sees one uniform contract.

use std::io;

use thiserror::Error;

use super::utils::Cell;

/// Errors returned by [`Table`] implementations and by the value types they
/// carry.
#[derive(Debug, Error)]
pub enum TableError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The on-disk bytes do not describe a valid segment.
    #[error("Corrupted segment: {0}")]
    Corruption(String),

    /// A mutation was routed to an immutable segment.
    #[error("Table is immutable")]
    Immutable,

    /// The table has been closed and no longer holds its data.
    #[error("Table is closed")]
    Closed,

    /// Timestamps must be strictly positive.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(i64),

    /// A key, value or offset does not fit the 32-bit signed fields of the
    /// segment format.
    #[error("Segment exceeds the 2 GiB format limit")]
    SegmentTooLarge,

    /// Internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Boxed lazy cell stream produced by [`Table::iter_from`].
pub type CellIter<'a> = Box<dyn Iterator<Item = Result<Cell, TableError>> + 'a>;

/// A sorted store of [`Cell`]s.
pub trait Table {
    /// Returns the cells whose keys are `>= from`, in ascending key order.
    ///
    /// Each call builds a fresh sequence positioned at `from`.
    fn iter_from(&self, from: &[u8]) -> Result<CellIter<'_>, TableError>;

    /// Inserts or replaces the value for `key`.
    fn upsert(&mut self, key: &[u8], value: &[u8]) -> Result<(), TableError>;

    /// Records a deletion of `key`.
    fn remove(&mut self, key: &[u8]) -> Result<(), TableError>;

    /// Releases the resources held by the table.
    fn close(&mut self) -> Result<(), TableError>;
}
