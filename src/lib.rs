//! # StratumDB
//!
//! An embeddable, persistent key-value store built on a
//! **Log-Structured Merge Tree (LSM-tree)**. Writes land in a sorted
//! in-memory table that is periodically flushed to immutable, sorted segment
//! files; reads merge all layers newest-first; an explicit compaction folds
//! every segment back into one.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stratumdb::{Db, DbConfig};
//!
//! let db = Db::open("/tmp/my_db", DbConfig::default()).unwrap();
//!
//! // Write
//! db.put(b"hello", b"world").unwrap();
//!
//! // Read
//! assert_eq!(db.get(b"hello").unwrap(), Some(b"world".to_vec()));
//!
//! // Delete
//! db.delete(b"hello").unwrap();
//! assert_eq!(db.get(b"hello").unwrap(), None);
//!
//! // Scan
//! db.put(b"a", b"1").unwrap();
//! db.put(b"b", b"2").unwrap();
//! let results = db.scan(b"a").unwrap();
//! assert_eq!(results.len(), 2);
//!
//! // Fold all segments into one
//! db.compact().unwrap();
//!
//! // Graceful shutdown
//! db.close().unwrap();
//! ```
//!
//! ## Features
//!
//! - **Big-endian segment format**: length-prefixed entries followed by an
//!   offset table, binary-searchable through a read-only memory map.
//! - **Tombstone deletes**: deletions shadow older versions until compaction
//!   drops them.
//! - **Crash-safe publication**: every segment is written to a temp file,
//!   synced and renamed into place before any in-memory state changes.
//! - **Single-segment compaction**: all live data rewritten into `0.dat`.
//!
//! ## Durability
//!
//! There is no write-ahead log. Writes acknowledged since the last flush live
//! only in memory and are lost if the process crashes before [`Db::flush`],
//! [`Db::close`] or an automatic size-triggered flush.

pub(crate) mod engine;
pub(crate) mod memtable;
pub(crate) mod sstable;

use std::fs;
use std::path::{Path, PathBuf};

use crossbeam::sync::ShardedLock;
use thiserror::Error;
use tracing::info;

pub use engine::{Engine, EngineConfig, EngineError, EngineStats, RecoveryMode, TableError};

/// A single key-value pair yielded by scans.
pub type KeyValue = (Vec<u8>, Vec<u8>);

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Configuration for a [`Db`] instance.
///
/// The configuration is validated when passed to [`Db::open`].
///
/// # Example
///
/// ```rust
/// use stratumdb::{DbConfig, RecoveryMode};
///
/// // Use defaults (64 KiB memtable, strict recovery)
/// let config = DbConfig::default();
///
/// // Or customize
/// let config = DbConfig {
///     flush_threshold: 1024 * 1024,
///     recovery: RecoveryMode::SkipCorrupt,
/// };
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Memtable size in bytes above which it is flushed to a new segment.
    ///
    /// Default: 64 KiB. Must be > 0.
    pub flush_threshold: u64,

    /// What to do with a segment file that cannot be opened at startup.
    ///
    /// Default: [`RecoveryMode::Strict`].
    pub recovery: RecoveryMode,
}

impl Default for DbConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            flush_threshold: engine.flush_threshold,
            recovery: engine.recovery,
        }
    }
}

impl DbConfig {
    /// Validates all configuration parameters.
    pub fn validate(&self) -> Result<(), DbError> {
        if self.flush_threshold == 0 {
            return Err(DbError::InvalidConfig(
                "flush_threshold must be > 0".into(),
            ));
        }
        Ok(())
    }

    fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            flush_threshold: self.flush_threshold,
            recovery: self.recovery,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors returned by [`Db`] operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// The database has been closed.
    #[error("database is closed")]
    Closed,

    /// Invalid configuration parameter.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Key constraint violated.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An engine-internal error occurred.
    #[error("{0}")]
    Engine(#[from] EngineError),
}

// ------------------------------------------------------------------------------------------------
// Database handle
// ------------------------------------------------------------------------------------------------

/// The main database handle.
///
/// # Thread safety
///
/// `Db` is `Send + Sync` and can be shared across threads via `Arc<Db>`.
/// The engine sits behind a [`ShardedLock`]: reads (`get`, `scan`, `stats`)
/// proceed in parallel, while writes, flushes and compaction take the lock
/// exclusively. Scans collect their results before releasing the lock.
///
/// # Shutdown
///
/// Call [`Db::close`] for a graceful shutdown. If the handle is dropped
/// without calling `close`, the engine flushes its memtable on drop and
/// logs any error instead of returning it.
pub struct Db {
    dir: PathBuf,

    /// `None` once the database has been closed.
    engine: ShardedLock<Option<Engine>>,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let closed = self.engine.read().map(|g| g.is_none()).unwrap_or(true);
        f.debug_struct("Db")
            .field("dir", &self.dir)
            .field("closed", &closed)
            .finish_non_exhaustive()
    }
}

impl Db {
    /// Opens (or creates) a database in the given directory.
    ///
    /// A missing directory is created. In an existing directory every
    /// segment file is reopened; the memtable always starts empty.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidConfig`] if any configuration parameter
    /// is out of range, or [`DbError::Engine`] if recovery fails.
    pub fn open(path: impl AsRef<Path>, config: DbConfig) -> Result<Self, DbError> {
        config.validate()?;

        let dir = path.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(EngineError::from)?;

        let engine = Engine::open(&dir, config.to_engine_config())?;

        info!(path = %dir.display(), flush_threshold = config.flush_threshold, "database opened");

        Ok(Self {
            dir,
            engine: ShardedLock::new(Some(engine)),
        })
    }

    /// Gracefully shuts down the database.
    ///
    /// Flushes a non-empty memtable and releases all segment files.
    /// Subsequent operations on this handle return [`DbError::Closed`].
    /// Calling `close` more than once is harmless. If the final flush fails
    /// the handle stays open with every write intact, and `close` may be
    /// retried.
    pub fn close(&self) -> Result<(), DbError> {
        let mut guard = self.engine.write().map_err(|_| poisoned())?;

        if let Some(engine) = guard.as_mut() {
            engine.shutdown()?;
            guard.take();
            info!(path = %self.dir.display(), "database closed");
        }
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Write operations
    // --------------------------------------------------------------------------------------------

    /// Inserts or updates a key-value pair.
    ///
    /// If the memtable grows past the flush threshold it is written to a new
    /// segment before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidArgument`] if `key` is empty.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), DbError> {
        check_key(key)?;
        self.with_engine_mut(|engine| engine.upsert(key, value))
    }

    /// Deletes a key by writing a tombstone.
    ///
    /// Subsequent reads return `None` until a new value is written.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidArgument`] if `key` is empty.
    pub fn delete(&self, key: &[u8]) -> Result<(), DbError> {
        check_key(key)?;
        self.with_engine_mut(|engine| engine.remove(key))
    }

    // --------------------------------------------------------------------------------------------
    // Read operations
    // --------------------------------------------------------------------------------------------

    /// Retrieves the value associated with a key.
    ///
    /// Returns `Ok(None)` if the key does not exist or has been deleted.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidArgument`] if `key` is empty.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DbError> {
        check_key(key)?;
        self.with_engine(|engine| engine.get(key))
    }

    /// Returns every live key-value pair with key `>= from`, sorted by key.
    ///
    /// An empty `from` scans the whole database.
    pub fn scan(&self, from: &[u8]) -> Result<Vec<KeyValue>, DbError> {
        self.with_engine(|engine| engine.iter(from)?.collect())
    }

    /// Returns the live key-value pairs in the half-open range `[start, end)`.
    ///
    /// Returns an empty `Vec` if `start >= end`.
    pub fn range(&self, start: &[u8], end: &[u8]) -> Result<Vec<KeyValue>, DbError> {
        if start >= end {
            return Ok(Vec::new());
        }
        self.with_engine(|engine| {
            engine
                .iter(start)?
                .take_while(|item| {
                    item.as_ref()
                        .ok()
                        .is_none_or(|(key, _)| key.as_slice() < end)
                })
                .collect()
        })
    }

    /// Returns a snapshot of engine statistics.
    pub fn stats(&self) -> Result<EngineStats, DbError> {
        self.with_engine(|engine| Ok(engine.stats()))
    }

    // --------------------------------------------------------------------------------------------
    // Maintenance
    // --------------------------------------------------------------------------------------------

    /// Writes the memtable to a new segment. Does nothing if it is empty.
    pub fn flush(&self) -> Result<(), DbError> {
        self.with_engine_mut(Engine::flush)
    }

    /// Rewrites all live data into a single segment and deletes the rest.
    ///
    /// This is a **blocking** operation that holds the write lock for its
    /// whole duration.
    pub fn compact(&self) -> Result<(), DbError> {
        self.with_engine_mut(Engine::compact)
    }

    // --------------------------------------------------------------------------------------------
    // Internal helpers
    // --------------------------------------------------------------------------------------------

    fn with_engine<R>(
        &self,
        f: impl FnOnce(&Engine) -> Result<R, EngineError>,
    ) -> Result<R, DbError> {
        let guard = self.engine.read().map_err(|_| poisoned())?;
        let engine = guard.as_ref().ok_or(DbError::Closed)?;
        Ok(f(engine)?)
    }

    fn with_engine_mut<R>(
        &self,
        f: impl FnOnce(&mut Engine) -> Result<R, EngineError>,
    ) -> Result<R, DbError> {
        let mut guard = self.engine.write().map_err(|_| poisoned())?;
        let engine = guard.as_mut().ok_or(DbError::Closed)?;
        Ok(f(engine)?)
    }
}

fn check_key(key: &[u8]) -> Result<(), DbError> {
    if key.is_empty() {
        return Err(DbError::InvalidArgument("key must not be empty".into()));
    }
    Ok(())
}

fn poisoned() -> DbError {
    DbError::Engine(EngineError::Internal("engine lock poisoned".into()))
}
