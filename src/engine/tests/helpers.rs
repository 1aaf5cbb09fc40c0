use crate::KeyValue;
use crate::engine::{Cell, Engine, EngineConfig, RecoveryMode, TableError, Value};
use crate::sstable::SSTable;
use std::fs;
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times: only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config for tests that should NOT trigger automatic flushes.
pub fn memtable_only_config() -> EngineConfig {
    init_tracing();
    EngineConfig {
        flush_threshold: 64 * 1024 * 1024,
        recovery: RecoveryMode::Strict,
    }
}

/// Config with an arbitrary flush threshold.
pub fn threshold_config(flush_threshold: u64) -> EngineConfig {
    init_tracing();
    EngineConfig {
        flush_threshold,
        recovery: RecoveryMode::Strict,
    }
}

/// Small threshold that flushes every few writes.
pub fn small_config() -> EngineConfig {
    threshold_config(256)
}

pub fn open(path: &Path) -> Engine {
    Engine::open(path, memtable_only_config()).expect("open")
}

/// Collect all live pairs with keys `>= from`.
pub fn collect(engine: &Engine, from: &[u8]) -> Vec<KeyValue> {
    engine
        .iter(from)
        .expect("iter")
        .collect::<Result<Vec<_>, _>>()
        .expect("scan")
}

pub fn kv(key: &str, value: &str) -> KeyValue {
    (key.as_bytes().to_vec(), value.as_bytes().to_vec())
}

/// Sorted names of all files in `dir`.
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .expect("read_dir")
        .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Writes a segment directly, bypassing the engine. `None` marks a tombstone.
pub fn write_segment(path: &Path, cells: &[(&str, i64, Option<&str>)]) {
    let cells = cells.iter().map(|(key, ts, value)| -> Result<Cell, TableError> {
        let value = match value {
            Some(v) => Value::live(*ts, v.as_bytes())?,
            None => Value::tombstone(*ts)?,
        };
        Ok(Cell::new(key.as_bytes(), value))
    });
    SSTable::write(path, cells).expect("write segment");
}
