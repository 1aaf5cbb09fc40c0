//! SSTable writer: streams sorted cells into the segment format.
//!
//! [`SSTable::write`] consumes cells that are **already** sorted by key with
//! at most one cell per key. Merging and deduplication are the caller's job;
//! the writer only checks that keys strictly increase and fails otherwise.
//!
//! Entries are written as they arrive. Only the 4-byte offset of each entry
//! is buffered, to be written as the trailer once the input is exhausted.
//!
//! The writer does not publish the file: it writes to exactly the path it is
//! given and syncs it. Making the segment visible under its final name is the
//! engine's responsibility (write to a temp path, then rename).

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::debug;

use crate::engine::{Cell, TableError};

use super::SSTable;

/// Summary of a finished [`SSTable::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteStats {
    /// Number of entries written.
    pub entries: usize,

    /// Number of tombstones among them.
    pub tombstones: usize,

    /// Total file size in bytes, trailer included.
    pub bytes: u64,
}

impl SSTable {
    /// Serializes `cells` into a new segment file at `path`.
    ///
    /// An existing file at `path` is truncated. The file is flushed and
    /// `fsync`ed before this returns.
    ///
    /// # Errors
    ///
    /// - Any error yielded by `cells` aborts the write and is returned as is.
    /// - [`TableError::Internal`] if keys are not strictly increasing.
    /// - [`TableError::SegmentTooLarge`] if a length or offset exceeds the
    ///   32-bit signed fields of the format.
    /// - [`TableError::Io`] on write failure.
    pub fn write<I>(path: impl AsRef<Path>, cells: I) -> Result<WriteStats, TableError>
    where
        I: IntoIterator<Item = Result<Cell, TableError>>,
    {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let mut writer = BufWriter::new(file);

        let mut offsets: Vec<i32> = Vec::new();
        let mut position: u64 = 0;
        let mut tombstones = 0usize;
        let mut last_key: Option<Vec<u8>> = None;

        for cell in cells {
            let cell = cell?;

            if last_key.as_deref().is_some_and(|prev| prev >= cell.key()) {
                return Err(TableError::Internal(format!(
                    "segment keys out of order at entry {}",
                    offsets.len()
                )));
            }

            offsets.push(to_i32(position)?);
            position += write_cell(&mut writer, &cell)?;

            if cell.value().is_tombstone() {
                tombstones += 1;
            }
            last_key = Some(cell.key().to_vec());
        }

        // Offsets must address bytes before the trailer.
        to_i32(position)?;

        for offset in &offsets {
            writer.write_all(&offset.to_be_bytes())?;
        }
        writer.write_all(&to_i32(offsets.len() as u64)?.to_be_bytes())?;

        let file: File = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;

        let stats = WriteStats {
            entries: offsets.len(),
            tombstones,
            bytes: file.metadata()?.len(),
        };

        debug!(
            path = %path.display(),
            entries = stats.entries,
            tombstones = stats.tombstones,
            bytes = stats.bytes,
            "segment written"
        );

        Ok(stats)
    }
}

/// Writes one entry and returns the number of bytes it occupies.
fn write_cell(writer: &mut impl Write, cell: &Cell) -> Result<u64, TableError> {
    let key = cell.key();
    let value = cell.value();

    writer.write_all(&to_i32(key.len() as u64)?.to_be_bytes())?;
    writer.write_all(key)?;

    let mut written = (super::SST_LEN_SIZE + key.len() + super::SST_TIMESTAMP_SIZE) as u64;

    match value.data() {
        None => {
            writer.write_all(&(-value.timestamp()).to_be_bytes())?;
        }
        Some(data) => {
            writer.write_all(&value.timestamp().to_be_bytes())?;
            writer.write_all(&to_i32(data.len() as u64)?.to_be_bytes())?;
            writer.write_all(data)?;
            written += (super::SST_LEN_SIZE + data.len()) as u64;
        }
    }

    Ok(written)
}

fn to_i32(n: u64) -> Result<i32, TableError> {
    i32::try_from(n).map_err(|_| TableError::SegmentTooLarge)
}
