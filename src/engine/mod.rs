//! # LSM Storage Engine
//!
//! This module implements a **synchronous**, **crash-safe** LSM storage engine
//! over a single directory of generation-numbered segments.
//!
//! ## Design Overview
//!
//! The engine organises data across two layers, queried newest-first:
//!
//! 1. **Memtable**: an in-memory sorted map holding the latest version of
//!    every key written since the last flush.
//! 2. **Segments**: immutable, sorted, on-disk files named
//!    `<generation>.dat`, kept in a map ordered by generation.
//!
//! Writes go into the memtable. When its estimated size exceeds
//! [`EngineConfig::flush_threshold`] it is written to a new segment under the
//! next generation number and replaced with an empty memtable.
//!
//! Reads build one lazy cursor per layer, merge them by `(key ASC,
//! timestamp DESC)`, keep the first (freshest) cell of every key and drop
//! tombstones.
//!
//! [`Engine::compact`] rewrites the live state into a single segment at
//! generation 0 and deletes every other segment file.
//!
//! ## Publication protocol
//!
//! Every durable state change follows the same order:
//!
//! 1. Serialize into `<generation>.tmp` and `fsync` it.
//! 2. Atomically rename it to its final `<generation>.dat` name.
//! 3. Only then update in-memory bookkeeping and delete superseded files.
//!
//! A failure before step 2 leaves the previous durable state untouched.
//!
//! ## Concurrency Model
//!
//! The engine has no internal locks. Mutating methods take `&mut self` and
//! reads take `&self`; an iterator returned by [`Engine::iter`] borrows the
//! engine, so it always observes the snapshot it was built from. Callers
//! needing shared access use [`Db`](crate::Db) or their own lock.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::KeyValue;
use crate::memtable::MemTable;
use crate::sstable::SSTable;
use crate::sstable::builder::WriteStats;

pub mod table;
pub mod utils;
mod visibility;

pub use table::{CellIter, Table, TableError};
pub use utils::{Cell, MergeIterator, Value};
pub use visibility::{Freshest, VisibilityFilter};

#[cfg(test)]
mod tests;

/// Suffix of published segment files.
pub const SEGMENT_SUFFIX: &str = ".dat";

/// Suffix of segment files still being written.
pub const TEMP_SUFFIX: &str = ".tmp";

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Error originating from a memtable or segment.
    #[error("Table error: {0}")]
    Table(#[from] TableError),

    /// A segment file found at startup could not be opened.
    #[error("Segment {generation} could not be recovered: {source}")]
    CorruptSegment {
        /// Generation parsed from the file name.
        generation: u64,
        /// Why the segment failed to open.
        source: TableError,
    },

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration parameter.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Two segment files name the same generation (e.g. `7.dat` and `07.dat`).
    #[error(
        "Generation {generation} is claimed by both {} and {}",
        .first.display(),
        .second.display()
    )]
    DuplicateGeneration {
        /// Generation parsed from both file names.
        generation: u64,
        /// File registered first.
        first: PathBuf,
        /// File found second.
        second: PathBuf,
    },

    /// Internal invariant violation (poisoned lock, unexpected state, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// What [`Engine::open`] does with a segment file that fails to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoveryMode {
    /// Abort startup with [`EngineError::CorruptSegment`].
    #[default]
    Strict,

    /// Log the failure and continue without the segment. Its generation is
    /// still reserved, so no flush overwrites the file, but the next
    /// [`Engine::compact`] deletes it along with every other superseded
    /// segment.
    SkipCorrupt,
}

/// Configuration for an [`Engine`] instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Memtable size (bytes) above which it is flushed to a segment.
    pub flush_threshold: u64,

    /// Handling of unreadable segment files at startup.
    pub recovery: RecoveryMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            flush_threshold: 64 * 1024,
            recovery: RecoveryMode::Strict,
        }
    }
}

/// Snapshot of engine statistics returned by [`Engine::stats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    /// Distinct keys (tombstones included) held in the memtable.
    pub memtable_entries: usize,
    /// Accounted size of the memtable in bytes.
    pub memtable_size_bytes: u64,
    /// Number of registered segments.
    pub segment_count: usize,
    /// Generations of registered segments, ascending.
    pub generations: Vec<u64>,
    /// Sum of all segment file sizes in bytes.
    pub total_segment_bytes: u64,
    /// Generation the next flush will use.
    pub next_generation: u64,
}

/// The LSM storage engine over one directory.
pub struct Engine {
    /// Directory holding the segment files.
    dir: PathBuf,

    config: EngineConfig,

    /// Table that accepts writes.
    memtable: MemTable,

    /// Opened segments by generation.
    segments: BTreeMap<u64, SSTable>,

    /// Segment files that are not registered but still await deletion by
    /// the next compaction: unreadable files skipped at open, and files a
    /// failed compaction could not remove.
    stale: BTreeMap<u64, PathBuf>,

    /// Generation assigned to the next flushed segment. Greater than every
    /// generation present on disk.
    next_generation: u64,

    /// Set once [`Engine::close`] has run.
    closed: bool,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("dir", &self.dir)
            .field("memtable_entries", &self.memtable.len())
            .field("generations", &self.segments.keys().collect::<Vec<_>>())
            .field("next_generation", &self.next_generation)
            .finish_non_exhaustive()
    }
}

impl Engine {
    // --------------------------------------------------------------------------------------------
    // Lifecycle
    // --------------------------------------------------------------------------------------------

    /// Opens the engine over an existing directory.
    ///
    /// Every `<generation>.dat` file is opened as a segment and the next
    /// generation is set one past the highest generation found (0 if none).
    /// Leftover `.tmp` files from an interrupted flush or compaction are
    /// removed; they are never treated as segments.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidConfig`] if `flush_threshold` is 0.
    /// - [`EngineError::Io`] if the directory cannot be listed.
    /// - [`EngineError::CorruptSegment`] if a segment fails to open, or its
    ///   generation is `u64::MAX`, under [`RecoveryMode::Strict`].
    /// - [`EngineError::DuplicateGeneration`] if two file names parse to the
    ///   same generation.
    pub fn open(dir: impl AsRef<Path>, config: EngineConfig) -> Result<Self, EngineError> {
        if config.flush_threshold == 0 {
            return Err(EngineError::InvalidConfig(
                "flush_threshold must be > 0".into(),
            ));
        }

        let dir = dir.as_ref().to_path_buf();
        let mut segments: BTreeMap<u64, SSTable> = BTreeMap::new();
        let mut stale: BTreeMap<u64, PathBuf> = BTreeMap::new();
        let mut next_generation = 0u64;

        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }

            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            if parse_generation(name, TEMP_SUFFIX).is_some() {
                warn!(path = %path.display(), "removing temp file left by an interrupted write");
                fs::remove_file(&path)?;
                continue;
            }

            let Some(generation) = parse_generation(name, SEGMENT_SUFFIX) else {
                continue;
            };

            let claimed = segments
                .get(&generation)
                .map(|sstable| sstable.path().to_path_buf())
                .or_else(|| stale.get(&generation).cloned());
            if let Some(first) = claimed {
                return Err(EngineError::DuplicateGeneration {
                    generation,
                    first,
                    second: path,
                });
            }

            let Some(successor) = generation.checked_add(1) else {
                let source = TableError::Corruption(format!(
                    "generation {generation} leaves no room for a successor"
                ));
                match config.recovery {
                    RecoveryMode::Strict => {
                        return Err(EngineError::CorruptSegment { generation, source });
                    }
                    RecoveryMode::SkipCorrupt => {
                        warn!(path = %path.display(), error = %source, "ignoring segment");
                        continue;
                    }
                }
            };

            // Reserve the generation even if the file turns out unreadable,
            // so a later flush never overwrites it.
            next_generation = next_generation.max(successor);

            match SSTable::open(&path) {
                Ok(sstable) => {
                    debug!(generation, entries = sstable.entry_count(), "segment recovered");
                    segments.insert(generation, sstable);
                }
                Err(source) => match config.recovery {
                    RecoveryMode::Strict => {
                        return Err(EngineError::CorruptSegment { generation, source });
                    }
                    RecoveryMode::SkipCorrupt => {
                        warn!(
                            generation,
                            path = %path.display(),
                            error = %source,
                            "skipping unreadable segment"
                        );
                        stale.insert(generation, path);
                    }
                },
            }
        }

        info!(
            dir = %dir.display(),
            segments = segments.len(),
            next_generation,
            "engine opened"
        );

        Ok(Self {
            dir,
            config,
            memtable: MemTable::new(),
            segments,
            stale,
            next_generation,
            closed: false,
        })
    }

    /// Flushes a non-empty memtable and releases every segment.
    ///
    /// Dropping an engine without calling `close` performs the same steps,
    /// logging instead of returning any error.
    pub fn close(mut self) -> Result<(), EngineError> {
        self.shutdown()
    }

    /// Runs the close sequence once. A failed flush leaves the engine open
    /// with its memtable intact, so the call can be retried.
    pub(crate) fn shutdown(&mut self) -> Result<(), EngineError> {
        if self.closed {
            return Ok(());
        }

        self.flush()?;

        for sstable in self.segments.values_mut() {
            sstable.close()?;
        }
        self.memtable.close()?;
        self.closed = true;

        info!(dir = %self.dir.display(), "engine closed");
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Writes
    // --------------------------------------------------------------------------------------------

    /// Inserts or replaces the value of `key`.
    ///
    /// Flushes the memtable if the write pushed it over the threshold.
    pub fn upsert(&mut self, key: &[u8], value: &[u8]) -> Result<(), EngineError> {
        trace!(key_len = key.len(), value_len = value.len(), "engine upsert");
        self.memtable.upsert(key, value)?;
        self.flush_if_full()
    }

    /// Deletes `key` by writing a tombstone.
    ///
    /// Flushes the memtable if the write pushed it over the threshold.
    pub fn remove(&mut self, key: &[u8]) -> Result<(), EngineError> {
        trace!(key_len = key.len(), "engine remove");
        self.memtable.remove(key)?;
        self.flush_if_full()
    }

    fn flush_if_full(&mut self) -> Result<(), EngineError> {
        if self.memtable.size_in_bytes() > self.config.flush_threshold {
            self.flush()?;
        }
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Reads
    // --------------------------------------------------------------------------------------------

    /// Returns the live value of `key`, or `None` if it was never written or
    /// its latest version is a tombstone.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        let mut freshest: Option<Value> = self.memtable.get(key).cloned();

        for sstable in self.segments.values().rev() {
            if let Some(candidate) = sstable.get(key)? {
                // Values order newest-first.
                if freshest.as_ref().is_none_or(|current| candidate < *current) {
                    freshest = Some(candidate);
                }
            }
        }

        Ok(freshest.and_then(Value::into_data))
    }

    /// Iterates the live `(key, value)` pairs with keys `>= from`, ascending.
    ///
    /// The sequence is lazy: each step reads at most one entry from each
    /// layer. An I/O or corruption error is yielded once, after which the
    /// sequence ends.
    pub fn iter<'a>(
        &'a self,
        from: &[u8],
    ) -> Result<impl Iterator<Item = Result<KeyValue, EngineError>> + use<'a>, EngineError> {
        trace!(from_len = from.len(), "engine iter");
        let merged = self.merged(from)?;
        Ok(VisibilityFilter::new(merged).map(|item| item.map_err(EngineError::from)))
    }

    /// Merges the memtable with every segment, newest generation first.
    fn merged(&self, from: &[u8]) -> Result<MergeIterator<'_>, EngineError> {
        let mut iters: Vec<CellIter<'_>> = Vec::with_capacity(self.segments.len() + 1);

        iters.push(self.memtable.iter_from(from)?);
        for sstable in self.segments.values().rev() {
            iters.push(sstable.iter_from(from)?);
        }

        Ok(MergeIterator::new(iters))
    }

    /// Returns a snapshot of engine statistics.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            memtable_entries: self.memtable.len(),
            memtable_size_bytes: self.memtable.size_in_bytes(),
            segment_count: self.segments.len(),
            generations: self.segments.keys().copied().collect(),
            total_segment_bytes: self.segments.values().map(SSTable::file_size).sum(),
            next_generation: self.next_generation,
        }
    }

    // --------------------------------------------------------------------------------------------
    // Flush & compaction
    // --------------------------------------------------------------------------------------------

    /// Writes the memtable to a new segment and starts a fresh memtable.
    ///
    /// Does nothing if the memtable is empty. On error the memtable and the
    /// segment map are left as they were.
    pub fn flush(&mut self) -> Result<(), EngineError> {
        if self.memtable.is_empty() {
            return Ok(());
        }

        let generation = self.next_generation;
        let cells = self.memtable.iter(&[]).map(Ok);
        let (sstable, stats) = self.publish(generation, generation, cells)?;

        self.memtable = MemTable::new();
        self.segments.insert(generation, sstable);
        self.next_generation += 1;

        info!(
            generation,
            entries = stats.entries,
            tombstones = stats.tombstones,
            bytes = stats.bytes,
            "memtable flushed"
        );
        Ok(())
    }

    /// Rewrites all live data into a single segment at generation 0.
    ///
    /// The memtable is flushed first so that every tombstone is durable in
    /// some segment. The merged, deduplicated, tombstone-free stream is then
    /// written to a temp file and renamed over `0.dat`, after which every
    /// superseded segment file (registered or skipped at open) is deleted
    /// oldest first, by the exact path it was found under. An interrupted
    /// compaction therefore leaves a directory that still reads back the
    /// same data.
    pub fn compact(&mut self) -> Result<(), EngineError> {
        self.flush()?;

        let segments_before = self.segments.len();
        let staging = self.next_generation;

        let cells = Freshest::new(self.merged(&[])?)
            .filter(|item| !matches!(item, Ok(cell) if cell.value().is_tombstone()));
        let (sstable, stats) = self.publish(staging, 0, cells)?;
        let published = sstable.path().to_path_buf();

        let superseded = std::mem::replace(&mut self.segments, BTreeMap::from([(0, sstable)]));
        let mut doomed = std::mem::take(&mut self.stale);
        for (generation, mut old) in superseded {
            old.close()?;
            doomed.insert(generation, old.path().to_path_buf());
        }
        // The rename already replaced a file named exactly `0.dat`.
        doomed.retain(|_, path| *path != published);

        while let Some((generation, path)) = doomed.pop_first() {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    error!(
                        generation,
                        path = %path.display(),
                        error = %e,
                        "failed to delete superseded segment"
                    );
                    doomed.insert(generation, path);
                    self.stale = doomed;
                    return Err(e.into());
                }
            }
        }
        sync_dir(&self.dir)?;

        self.memtable = MemTable::new();
        self.next_generation = 1;

        info!(
            segments_before,
            entries = stats.entries,
            bytes = stats.bytes,
            "compaction complete"
        );
        Ok(())
    }

    /// Serializes `cells` to `<staging>.tmp`, renames it to `<target>.dat`
    /// and opens the result.
    ///
    /// The temp file is removed if serialization fails.
    fn publish<I>(
        &self,
        staging: u64,
        target: u64,
        cells: I,
    ) -> Result<(SSTable, WriteStats), EngineError>
    where
        I: IntoIterator<Item = Result<Cell, TableError>>,
    {
        let temp_path = self.temp_path(staging);
        let final_path = self.segment_path(target);

        let stats = match SSTable::write(&temp_path, cells) {
            Ok(stats) => stats,
            Err(e) => {
                error!(path = %temp_path.display(), error = %e, "segment write failed");
                if let Err(cleanup) = fs::remove_file(&temp_path) {
                    warn!(path = %temp_path.display(), error = %cleanup, "failed to remove temp file");
                }
                return Err(e.into());
            }
        };

        fs::rename(&temp_path, &final_path)?;
        sync_dir(&self.dir)?;

        let sstable = SSTable::open(&final_path)?;
        Ok((sstable, stats))
    }

    fn segment_path(&self, generation: u64) -> PathBuf {
        self.dir.join(format!("{generation}{SEGMENT_SUFFIX}"))
    }

    fn temp_path(&self, generation: u64) -> PathBuf {
        self.dir.join(format!("{generation}{TEMP_SUFFIX}"))
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!(dir = %self.dir.display(), error = %e, "engine shutdown on drop failed");
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Directory helpers
// ------------------------------------------------------------------------------------------------

/// Parses `<digits><suffix>` into a generation number.
pub(crate) fn parse_generation(name: &str, suffix: &str) -> Option<u64> {
    let stem = name.strip_suffix(suffix)?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// Fsyncs a directory so renames and deletions inside it are durable.
fn sync_dir(dir: &Path) -> Result<(), EngineError> {
    if let Ok(handle) = File::open(dir) {
        handle.sync_all()?;
    }
    Ok(())
}
