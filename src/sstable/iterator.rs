//! Forward cursor over an [`SSTable`].
//!
//! [`SSTableIter`] starts at a row chosen by binary search and decodes one
//! entry per step through the offset table. It never reads ahead, so a scan
//! that stops early touches only the entries it returned.
//!
//! A decode failure is yielded once as an `Err` item; the cursor is then
//! exhausted.

use crate::engine::{Cell, TableError};

use super::SSTable;

/// Iterator over the cells of one segment, from a starting row to the end.
pub struct SSTableIter<'a> {
    sstable: &'a SSTable,

    /// Next row to decode.
    row: usize,

    /// Set after an error so the cursor stops.
    failed: bool,
}

impl<'a> SSTableIter<'a> {
    pub(crate) fn new(sstable: &'a SSTable, row: usize) -> Self {
        Self {
            sstable,
            row,
            failed: false,
        }
    }

    /// Number of rows left to yield.
    pub fn remaining(&self) -> usize {
        if self.failed {
            return 0;
        }
        self.sstable.entry_count().saturating_sub(self.row)
    }
}

impl Iterator for SSTableIter<'_> {
    type Item = Result<Cell, TableError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.row >= self.sstable.entry_count() {
            return None;
        }

        let result = self.sstable.cell_at(self.row);
        self.row += 1;

        if let Err(e) = &result {
            tracing::warn!(
                path = %self.sstable.path().display(),
                row = self.row - 1,
                %e,
                "segment read failed during scan"
            );
            self.failed = true;
        }

        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining()))
    }
}
