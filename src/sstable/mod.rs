//! Sorted String Table (SSTable) Module
//!
//! This module implements the **immutable**, **disk-backed** segment format of
//! the engine. A segment holds at most one version per key, sorted by key, and
//! supports `O(log n)` positioning without reading the whole file.
//!
//! # On-disk layout
//!
//! All integers are **big-endian** and signed.
//!
//! ```text
//! repeated for each entry, ascending key order:
//!   [KEY_LEN i32][KEY_BYTES][TIMESTAMP i64]
//!       TIMESTAMP > 0 → live value:  [VALUE_LEN i32][VALUE_BYTES]
//!       TIMESTAMP < 0 → tombstone stamped at -TIMESTAMP, nothing follows
//! trailer:
//!   [OFFSET i32] × ENTRY_COUNT  : file offset of each entry's KEY_LEN
//!   [ENTRY_COUNT i32]
//! ```
//!
//! Putting the offset table at the end lets the writer stream entries without
//! knowing their count up front. The reader finds the count in the last four
//! bytes, locates the offset table right before it, and binary-searches keys
//! through it.
//!
//! # Sub-modules
//!
//! - [`builder`]: [`SSTable::write`], the streaming serializer.
//! - [`iterator`]: [`SSTableIter`], the forward cursor used by scans.
//!
//! # Concurrency model
//!
//! The file is memory-mapped read-only and never modified after it is
//! published, so any number of readers may share one `SSTable`.

pub mod builder;
pub mod iterator;


pub use iterator::SSTableIter;

use std::cmp::Ordering;
use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use tracing::{debug, error};

use crate::engine::{Cell, CellIter, Table, TableError, Value};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

pub(crate) const SST_LEN_SIZE: usize = std::mem::size_of::<i32>();
pub(crate) const SST_TIMESTAMP_SIZE: usize = std::mem::size_of::<i64>();

// ------------------------------------------------------------------------------------------------
// SSTable: immutable reader
// ------------------------------------------------------------------------------------------------

/// A memory-mapped, immutable segment.
pub struct SSTable {
    /// Path the segment was opened from.
    path: PathBuf,

    /// Read-only mapping of the whole file. `None` once closed.
    mmap: Option<Mmap>,

    /// Number of entries (and offsets) in the segment.
    entry_count: usize,

    /// Start of the offset table; all entry bytes lie before it.
    index_start: usize,

    /// Size of the file in bytes.
    file_size: u64,
}

impl std::fmt::Debug for SSTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTable")
            .field("path", &self.path)
            .field("entry_count", &self.entry_count)
            .field("file_size", &self.file_size)
            .field("closed", &self.mmap.is_none())
            .finish()
    }
}

impl SSTable {
    /// Opens a segment and validates its trailer.
    ///
    /// Only the entry count and the bounds of the offset table are checked
    /// here; individual entries are validated as they are read.
    ///
    /// # Errors
    ///
    /// - [`TableError::Io`] if the file cannot be opened or mapped.
    /// - [`TableError::Corruption`] if the file is too short for its trailer
    ///   or declares a negative entry count.
    ///
    /// # Safety
    ///
    /// Uses `unsafe { Mmap::map(...) }`. The engine never writes a published
    /// segment, and the mapping is read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TableError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();

        if file_size < SST_LEN_SIZE as u64 {
            return Err(TableError::Corruption(format!(
                "file of {file_size} bytes is too small for a segment trailer"
            )));
        }
        let mmap = unsafe { Mmap::map(&file)? };
        let len = mmap.len();

        let raw_count = read_i32(&mmap, len - SST_LEN_SIZE)?;
        let entry_count = usize::try_from(raw_count).map_err(|_| {
            TableError::Corruption(format!("negative entry count {raw_count}"))
        })?;

        let trailer_len = (entry_count + 1)
            .checked_mul(SST_LEN_SIZE)
            .ok_or_else(|| TableError::Corruption("entry count overflows".into()))?;
        let index_start = len.checked_sub(trailer_len).ok_or_else(|| {
            TableError::Corruption(format!(
                "entry count {entry_count} does not fit in {len} bytes"
            ))
        })?;

        debug!(path = %path.display(), entry_count, file_size, "segment opened");

        Ok(Self {
            path: path.to_path_buf(),
            mmap: Some(mmap),
            entry_count,
            index_start,
            file_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Returns the mapped bytes, or [`TableError::Closed`].
    fn bytes(&self) -> Result<&[u8], TableError> {
        self.mmap.as_deref().ok_or(TableError::Closed)
    }

    /// Returns the file offset at which entry `row` starts.
    fn offset(&self, row: usize) -> Result<usize, TableError> {
        if row >= self.entry_count {
            return Err(TableError::Internal(format!(
                "row {row} out of bounds ({} entries)",
                self.entry_count
            )));
        }

        let raw = read_i32(self.bytes()?, self.index_start + row * SST_LEN_SIZE)?;
        match usize::try_from(raw) {
            Ok(offset) if offset < self.index_start => Ok(offset),
            _ => Err(TableError::Corruption(format!(
                "row {row} has offset {raw} outside the data region"
            ))),
        }
    }

    /// Reads the length-prefixed byte string at `pos` inside the data region.
    ///
    /// Returns the bytes and the position right after them.
    fn read_bytes_at(&self, pos: usize) -> Result<(&[u8], usize), TableError> {
        let data = &self.bytes()?[..self.index_start];
        let raw_len = read_i32(data, pos)?;
        let len = usize::try_from(raw_len)
            .map_err(|_| TableError::Corruption(format!("negative length {raw_len} at {pos}")))?;

        let start = pos + SST_LEN_SIZE;
        let bytes = data.get(start..start + len).ok_or_else(|| {
            TableError::Corruption(format!("{len} bytes at {start} run past the data region"))
        })?;
        Ok((bytes, start + len))
    }

    /// Returns the key stored at `row` without copying it.
    pub fn key_at(&self, row: usize) -> Result<&[u8], TableError> {
        let (key, _) = self.read_bytes_at(self.offset(row)?)?;
        Ok(key)
    }

    /// Decodes the full cell stored at `row`.
    pub fn cell_at(&self, row: usize) -> Result<Cell, TableError> {
        let (key, pos) = self.read_bytes_at(self.offset(row)?)?;
        let data = &self.bytes()?[..self.index_start];
        let field = read_i64(data, pos)?;

        let value = match field.cmp(&0) {
            Ordering::Less => Value::tombstone(field.checked_neg().ok_or_else(|| {
                TableError::Corruption(format!("tombstone timestamp {field} at row {row}"))
            })?)?,
            Ordering::Greater => {
                let (payload, _) = self.read_bytes_at(pos + SST_TIMESTAMP_SIZE)?;
                Value::live(field, payload)?
            }
            Ordering::Equal => {
                return Err(TableError::Corruption(format!(
                    "zero timestamp at row {row}"
                )));
            }
        };

        Ok(Cell::new(key, value))
    }

    /// Returns the first row whose key is `>= key`, or `entry_count` if all
    /// keys are smaller.
    pub fn lower_bound(&self, key: &[u8]) -> Result<usize, TableError> {
        let mut low = 0;
        let mut high = self.entry_count;

        while low < high {
            let mid = low + (high - low) / 2;
            match self.key_at(mid)?.cmp(key) {
                Ordering::Less => low = mid + 1,
                Ordering::Greater => high = mid,
                Ordering::Equal => return Ok(mid),
            }
        }

        Ok(low)
    }

    /// Returns the version of `key` stored in this segment, if any.
    pub fn get(&self, key: &[u8]) -> Result<Option<Value>, TableError> {
        let row = self.lower_bound(key)?;
        if row >= self.entry_count || self.key_at(row)? != key {
            return Ok(None);
        }
        let (_, value) = self.cell_at(row)?.into_parts();
        Ok(Some(value))
    }

    /// Returns a forward cursor positioned at the first key `>= from`.
    pub fn iter(&self, from: &[u8]) -> Result<SSTableIter<'_>, TableError> {
        self.bytes()?;
        // The empty key sorts before every other key.
        let row = if from.is_empty() {
            0
        } else {
            self.lower_bound(from)?
        };
        Ok(SSTableIter::new(self, row))
    }
}

impl Table for SSTable {
    fn iter_from(&self, from: &[u8]) -> Result<CellIter<'_>, TableError> {
        Ok(Box::new(self.iter(from)?))
    }

    fn upsert(&mut self, _key: &[u8], _value: &[u8]) -> Result<(), TableError> {
        error!(path = %self.path.display(), "upsert routed to an immutable segment");
        Err(TableError::Immutable)
    }

    fn remove(&mut self, _key: &[u8]) -> Result<(), TableError> {
        error!(path = %self.path.display(), "remove routed to an immutable segment");
        Err(TableError::Immutable)
    }

    fn close(&mut self) -> Result<(), TableError> {
        self.mmap = None;
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Big-endian field readers
// ------------------------------------------------------------------------------------------------

fn read_i32(buf: &[u8], pos: usize) -> Result<i32, TableError> {
    buf.get(pos..pos + SST_LEN_SIZE)
        .and_then(|b| b.try_into().ok())
        .map(i32::from_be_bytes)
        .ok_or_else(|| TableError::Corruption(format!("truncated 4-byte field at {pos}")))
}

fn read_i64(buf: &[u8], pos: usize) -> Result<i64, TableError> {
    buf.get(pos..pos + SST_TIMESTAMP_SIZE)
        .and_then(|b| b.try_into().ok())
        .map(i64::from_be_bytes)
        .ok_or_else(|| TableError::Corruption(format!("truncated 8-byte field at {pos}")))
}
