//! Visibility filters for merged cell streams.
//!
//! Both adaptors expect input sorted by `(key ASC, timestamp DESC)`: the
//! order produced by [`MergeIterator`](super::utils::MergeIterator).
//!
//! - [`Freshest`] collapses each run of equal keys down to its first cell,
//!   which is the most recent version of that key.
//! - [`VisibilityFilter`] additionally drops tombstones and yields the
//!   surviving `(key, value)` pairs.

use crate::KeyValue;

use super::table::TableError;
use super::utils::Cell;

/// Keeps only the newest cell of every key.
pub struct Freshest<I>
where
    I: Iterator<Item = Result<Cell, TableError>>,
{
    input: I,
    /// Key of the last cell emitted.
    current_key: Option<Vec<u8>>,
}

impl<I> Freshest<I>
where
    I: Iterator<Item = Result<Cell, TableError>>,
{
    pub fn new(input: I) -> Self {
        Self {
            input,
            current_key: None,
        }
    }
}

impl<I> Iterator for Freshest<I>
where
    I: Iterator<Item = Result<Cell, TableError>>,
{
    type Item = Result<Cell, TableError>;

    fn next(&mut self) -> Option<Self::Item> {
        for item in self.input.by_ref() {
            let cell = match item {
                Ok(cell) => cell,
                Err(e) => return Some(Err(e)),
            };

            if self.current_key.as_deref() == Some(cell.key()) {
                continue;
            }

            self.current_key = Some(cell.key().to_vec());
            return Some(Ok(cell));
        }

        None
    }
}

/// Yields the live `(key, value)` pairs of a merged stream.
pub struct VisibilityFilter<I>
where
    I: Iterator<Item = Result<Cell, TableError>>,
{
    input: Freshest<I>,
}

impl<I> VisibilityFilter<I>
where
    I: Iterator<Item = Result<Cell, TableError>>,
{
    pub fn new(input: I) -> Self {
        Self {
            input: Freshest::new(input),
        }
    }
}

impl<I> Iterator for VisibilityFilter<I>
where
    I: Iterator<Item = Result<Cell, TableError>>,
{
    type Item = Result<KeyValue, TableError>;

    fn next(&mut self) -> Option<Self::Item> {
        for item in self.input.by_ref() {
            let (key, value) = match item {
                Ok(cell) => cell.into_parts(),
                Err(e) => return Some(Err(e)),
            };

            // Tombstone shadows every older version of the key.
            if let Some(data) = value.into_data() {
                return Some(Ok((key, data)));
            }
        }

        None
    }
}
