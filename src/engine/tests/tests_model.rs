//! Randomized model check.
//!
//! Drives the engine with a seeded random mix of upserts, removes, flushes,
//! compactions and reopen cycles, mirroring every write into a `BTreeMap`.
//! After each step a random point lookup, and periodically a full scan and a
//! scan from a random key, must match the model.

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use crate::KeyValue;
    use crate::engine::Engine;
    use crate::engine::tests::helpers::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::BTreeMap;
    use std::ops::Bound;
    use tempfile::TempDir;

    fn key(n: u32) -> Vec<u8> {
        format!("key_{n:03}").into_bytes()
    }

    fn model_scan(model: &BTreeMap<Vec<u8>, Vec<u8>>, from: &[u8]) -> Vec<KeyValue> {
        model
            .range::<[u8], _>((Bound::Included(from), Bound::Unbounded))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn run(seed: u64, steps: usize) {
        let tmp = TempDir::new().unwrap();
        let mut rng = StdRng::seed_from_u64(seed);
        let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        let mut engine = Engine::open(tmp.path(), small_config()).unwrap();

        for step in 0..steps {
            let roll = rng.random_range(0..100);
            let k = key(rng.random_range(0..64));

            match roll {
                0..=59 => {
                    let len = rng.random_range(0..24);
                    let value: Vec<u8> = (0..len).map(|_| rng.random()).collect();
                    engine.upsert(&k, &value).unwrap();
                    model.insert(k.clone(), value);
                }
                60..=89 => {
                    engine.remove(&k).unwrap();
                    model.remove(&k);
                }
                90..=94 => engine.flush().unwrap(),
                95..=97 => engine.compact().unwrap(),
                _ => {
                    engine.close().unwrap();
                    engine = Engine::open(tmp.path(), small_config()).unwrap();
                }
            }

            let probe = key(rng.random_range(0..64));
            assert_eq!(
                engine.get(&probe).unwrap(),
                model.get(&probe).cloned(),
                "seed {seed} step {step}: get mismatch"
            );

            if step % 25 == 0 {
                assert_eq!(
                    collect(&engine, b""),
                    model_scan(&model, b""),
                    "seed {seed} step {step}: full scan mismatch"
                );

                let from = key(rng.random_range(0..70));
                assert_eq!(
                    collect(&engine, &from),
                    model_scan(&model, &from),
                    "seed {seed} step {step}: scan from {from:?} mismatch"
                );
            }
        }

        engine.compact().unwrap();
        assert_eq!(collect(&engine, b""), model_scan(&model, b""));
        assert_eq!(engine.stats().segment_count, 1);
    }

    #[test]
    fn model__random_operations_seed_1() {
        run(1, 1500);
    }

    #[test]
    fn model__random_operations_seed_42() {
        run(42, 1500);
    }

    #[test]
    fn model__random_operations_seed_20261019() {
        run(20261019, 1000);
    }
}
