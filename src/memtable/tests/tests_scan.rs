#[cfg(test)]
mod tests {
    use crate::engine::{Cell, Table};
    use crate::memtable::MemTable;

    fn keys(cells: &[Cell]) -> Vec<Vec<u8>> {
        cells.iter().map(|c| c.key().to_vec()).collect()
    }

    fn populated() -> MemTable {
        let mut memtable = MemTable::new();
        for key in [b"d", b"b", b"e", b"a", b"c"] {
            memtable.upsert(key, b"v").unwrap();
        }
        memtable
    }

    #[test]
    fn test_iter_is_sorted() {
        let memtable = populated();
        let cells: Vec<Cell> = memtable.iter(b"").collect();

        assert_eq!(
            keys(&cells),
            vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec(), b"e".to_vec()]
        );
    }

    #[test]
    fn test_iter_from_is_inclusive() {
        let memtable = populated();
        let cells: Vec<Cell> = memtable.iter(b"c").collect();

        assert_eq!(keys(&cells), vec![b"c".to_vec(), b"d".to_vec(), b"e".to_vec()]);
    }

    #[test]
    fn test_iter_from_between_keys() {
        let memtable = populated();
        let cells: Vec<Cell> = memtable.iter(b"bb").collect();

        assert_eq!(keys(&cells), vec![b"c".to_vec(), b"d".to_vec(), b"e".to_vec()]);
    }

    #[test]
    fn test_iter_from_past_end_is_empty() {
        let memtable = populated();
        assert_eq!(memtable.iter(b"z").count(), 0);
    }

    #[test]
    fn test_iter_includes_tombstones() {
        let mut memtable = populated();
        memtable.remove(b"c").unwrap();

        let cells: Vec<Cell> = memtable.iter(b"").collect();
        assert_eq!(cells.len(), 5);
        assert!(cells[2].value().is_tombstone());
    }

    #[test]
    fn test_iter_from_is_restartable() {
        let memtable = populated();

        let first: Vec<Cell> = memtable.iter_from(b"b").unwrap().map(Result::unwrap).collect();
        let second: Vec<Cell> = memtable.iter_from(b"b").unwrap().map(Result::unwrap).collect();

        assert_eq!(keys(&first), keys(&second));
        assert_eq!(first.len(), 4);
    }

    #[test]
    fn test_iter_orders_bytes_lexicographically() {
        let mut memtable = MemTable::new();
        memtable.upsert(&[0xFF], b"hi").unwrap();
        memtable.upsert(&[0x00, 0x01], b"lo").unwrap();
        memtable.upsert(&[0x00], b"lowest").unwrap();

        let cells: Vec<Cell> = memtable.iter(&[]).collect();
        assert_eq!(
            keys(&cells),
            vec![vec![0x00], vec![0x00, 0x01], vec![0xFF]]
        );
    }
}
