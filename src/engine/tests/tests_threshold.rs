//! Size-triggered flush tests.
//!
//! The engine flushes after a write that leaves the memtable strictly larger
//! than the configured threshold.

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use crate::engine::tests::helpers::*;
    use crate::engine::{Engine, EngineError};
    use crate::memtable::{BASE_SIZE, TIMESTAMP_SIZE};
    use tempfile::TempDir;

    /// # Scenario
    /// The 100-byte threshold walkthrough.
    ///
    /// # Starting environment
    /// Fresh engine with `flush_threshold = 100`.
    ///
    /// # Actions
    /// 1. Upsert `"a"="1"`, `"b"="22"`; scan.
    /// 2. Remove `"a"`, flush; scan.
    ///
    /// # Expected behavior
    /// First scan yields both pairs with no segment on disk. After the remove
    /// and flush the scan yields only `("b","22")`, served from `0.dat`.
    #[test]
    fn memtable_sstable__hundred_byte_threshold_walkthrough() {
        let tmp = TempDir::new().unwrap();
        let mut engine = Engine::open(tmp.path(), threshold_config(100)).unwrap();

        engine.upsert(b"a", b"1").unwrap();
        engine.upsert(b"b", b"22").unwrap();

        assert_eq!(engine.stats().segment_count, 0);
        assert_eq!(collect(&engine, b""), vec![kv("a", "1"), kv("b", "22")]);

        engine.remove(b"a").unwrap();
        engine.flush().unwrap();

        assert_eq!(file_names(tmp.path()), vec!["0.dat".to_string()]);
        assert_eq!(engine.stats().memtable_entries, 0);
        assert_eq!(collect(&engine, b""), vec![kv("b", "22")]);
    }

    /// # Scenario
    /// Reaching the threshold exactly does not flush; exceeding it does.
    ///
    /// # Starting environment
    /// Threshold set to the size of the table after one `"a"="1"` write.
    ///
    /// # Actions
    /// 1. Upsert `"a"="1"`.
    /// 2. Upsert `"b"="2"`.
    ///
    /// # Expected behavior
    /// No segment after step 1; one segment and an empty memtable after
    /// step 2.
    #[test]
    fn memtable_sstable__flush_only_when_strictly_over() {
        let tmp = TempDir::new().unwrap();
        let threshold = BASE_SIZE + 1 + TIMESTAMP_SIZE + 1;
        let mut engine = Engine::open(tmp.path(), threshold_config(threshold)).unwrap();

        engine.upsert(b"a", b"1").unwrap();
        assert_eq!(engine.stats().segment_count, 0);
        assert_eq!(engine.stats().memtable_size_bytes, threshold);

        engine.upsert(b"b", b"2").unwrap();
        let stats = engine.stats();
        assert_eq!(stats.segment_count, 1);
        assert_eq!(stats.memtable_entries, 0);
        assert_eq!(stats.next_generation, 1);

        assert_eq!(collect(&engine, b""), vec![kv("a", "1"), kv("b", "2")]);
    }

    #[test]
    fn memtable_sstable__removes_can_trigger_flush() {
        let tmp = TempDir::new().unwrap();
        let mut engine = Engine::open(tmp.path(), threshold_config(BASE_SIZE + 20)).unwrap();

        engine.remove(b"first-key").unwrap();
        assert_eq!(engine.stats().segment_count, 0);

        engine.remove(b"second-key").unwrap();
        assert_eq!(engine.stats().segment_count, 1);
    }

    #[test]
    fn memtable_sstable__many_writes_produce_many_generations() {
        let tmp = TempDir::new().unwrap();
        let mut engine = Engine::open(tmp.path(), small_config()).unwrap();

        for i in 0..200 {
            let key = format!("key_{i:04}");
            engine.upsert(key.as_bytes(), b"some_value_padding").unwrap();
        }

        let stats = engine.stats();
        assert!(stats.segment_count >= 5, "got {}", stats.segment_count);
        assert_eq!(
            stats.generations,
            (0..stats.segment_count as u64).collect::<Vec<_>>()
        );
        assert_eq!(collect(&engine, b"").len(), 200);
    }

    #[test]
    fn config__zero_threshold_rejected() {
        let tmp = TempDir::new().unwrap();
        let result = Engine::open(tmp.path(), threshold_config(0));
        assert!(matches!(result, Err(EngineError::InvalidConfig(_))));
    }
}
