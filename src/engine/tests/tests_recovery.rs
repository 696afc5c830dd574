//! Durability tests: close → reopen, crash-style reopen without close,
//! WAL compaction, and snapshot export/restore round-trips.

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::backend::EngineType;
    use crate::engine::Engine;
    use crate::engine::tests::helpers::{
        all_backends, durable_config, memory_engine, reopen, sorted_entries,
    };

    #[test]
    fn test_reopen_after_clean_close() {
        for engine_type in all_backends() {
            let tmp = TempDir::new().unwrap();
            {
                let engine = Engine::open(durable_config(engine_type, tmp.path())).unwrap();
                for i in 0..10u32 {
                    engine
                        .set(format!("k{i}").as_bytes(), format!("v{i}").as_bytes())
                        .unwrap();
                }
                for i in 0..3u32 {
                    engine.delete(format!("k{i}").as_bytes()).unwrap();
                }
                engine.update(b"k5", b"updated").unwrap();
                engine.close().unwrap();
            }

            let engine = reopen(engine_type, tmp.path());
            assert_eq!(engine.count().unwrap(), 7, "{engine_type:?}");
            assert_eq!(engine.get(b"k0").unwrap(), None);
            assert_eq!(engine.get(b"k5").unwrap(), Some(b"updated".to_vec()));
            assert_eq!(engine.get(b"k9").unwrap(), Some(b"v9".to_vec()));
            engine.close().unwrap();
        }
    }

    #[test]
    fn test_reopen_after_crash_replays_wal() {
        let tmp = TempDir::new().unwrap();
        {
            let engine = Engine::open(durable_config(EngineType::Hash, tmp.path())).unwrap();
            for i in 0..25u32 {
                engine
                    .set(format!("k{i:02}").as_bytes(), format!("v{i}").as_bytes())
                    .unwrap();
            }
            engine.delete(b"k07").unwrap();
            // Dropped without close: no snapshot, recovery runs purely
            // off the WAL.
        }

        let engine = reopen(EngineType::Hash, tmp.path());
        assert_eq!(engine.count().unwrap(), 24);
        assert_eq!(engine.get(b"k07").unwrap(), None);
        assert_eq!(engine.get(b"k19").unwrap(), Some(b"v19".to_vec()));
        engine.close().unwrap();
    }

    #[test]
    fn test_replay_equals_direct_execution() {
        // The same op sequence executed directly and replayed through
        // recovery must answer every get identically.
        let tmp = TempDir::new().unwrap();
        let direct = memory_engine(EngineType::RbTree);
        {
            let durable = Engine::open(durable_config(EngineType::RbTree, tmp.path())).unwrap();
            for engine in [&direct, &durable] {
                for i in 0..30u32 {
                    engine
                        .set(format!("k{:02}", i % 10).as_bytes(), format!("v{i}").as_bytes())
                        .unwrap();
                }
                for i in 0..4u32 {
                    engine.delete(format!("k{i:02}").as_bytes()).unwrap();
                }
            }
        }

        let recovered = reopen(EngineType::RbTree, tmp.path());
        assert_eq!(sorted_entries(&direct), sorted_entries(&recovered));
        recovered.close().unwrap();
    }

    #[test]
    fn test_snapshot_then_wal_tail() {
        let tmp = TempDir::new().unwrap();
        {
            let engine = Engine::open(durable_config(EngineType::Hash, tmp.path())).unwrap();
            for i in 0..10u32 {
                engine.set(format!("k{i}").as_bytes(), b"base").unwrap();
            }
            engine.create_snapshot().unwrap();

            // Mutations past the snapshot live only in the WAL tail.
            engine.set(b"k3", b"changed").unwrap();
            engine.delete(b"k4").unwrap();
            engine.set(b"extra", b"tail").unwrap();
        }

        let engine = reopen(EngineType::Hash, tmp.path());
        assert_eq!(engine.count().unwrap(), 10);
        assert_eq!(engine.get(b"k3").unwrap(), Some(b"changed".to_vec()));
        assert_eq!(engine.get(b"k4").unwrap(), None);
        assert_eq!(engine.get(b"extra").unwrap(), Some(b"tail".to_vec()));
        assert_eq!(engine.get(b"k7").unwrap(), Some(b"base".to_vec()));
        engine.close().unwrap();
    }

    #[test]
    fn test_compact_then_recover() {
        let tmp = TempDir::new().unwrap();
        {
            let engine = Engine::open(durable_config(EngineType::RbTree, tmp.path())).unwrap();
            for round in 0..5u32 {
                for i in 0..10u32 {
                    engine
                        .set(
                            format!("k{i}").as_bytes(),
                            format!("round-{round}").as_bytes(),
                        )
                        .unwrap();
                }
            }
            engine.compact().unwrap();
            engine.set(b"post", b"compact").unwrap();
        }

        let engine = reopen(EngineType::RbTree, tmp.path());
        assert_eq!(engine.count().unwrap(), 11);
        assert_eq!(engine.get(b"k9").unwrap(), Some(b"round-4".to_vec()));
        assert_eq!(engine.get(b"post").unwrap(), Some(b"compact".to_vec()));
        engine.close().unwrap();
    }

    #[test]
    fn test_export_restore_round_trip() {
        let tmp = TempDir::new().unwrap();
        let dump = tmp.path().join("export.data");

        let source = memory_engine(EngineType::Hash);
        for i in 0..50u32 {
            source
                .set(format!("k{i:02}").as_bytes(), format!("v{i}").as_bytes())
                .unwrap();
        }
        source.export_snapshot(&dump).unwrap();
        source.close().unwrap();

        // A fresh engine on a different backend restores the same state.
        let target = memory_engine(EngineType::RbTree);
        target.set(b"stale", b"gone-after-restore").unwrap();
        target.restore_snapshot(&dump).unwrap();

        assert_eq!(target.count().unwrap(), 50);
        assert_eq!(target.get(b"stale").unwrap(), None);
        for i in 0..50u32 {
            assert_eq!(
                target.get(format!("k{i:02}").as_bytes()).unwrap(),
                Some(format!("v{i}").into_bytes())
            );
        }
    }

    #[test]
    fn test_restore_supersedes_stale_managed_snapshot() {
        let tmp = TempDir::new().unwrap();
        let dump = tmp.path().join("export.data");

        let source = memory_engine(EngineType::Hash);
        source.set(b"only", b"this").unwrap();
        source.export_snapshot(&dump).unwrap();

        let data_dir = tmp.path().join("db");
        {
            let engine = Engine::open(durable_config(EngineType::Hash, &data_dir)).unwrap();
            engine.set(b"stale", b"snapshotted").unwrap();
            // A managed snapshot now covers the pre-restore state.
            engine.create_snapshot().unwrap();
            engine.restore_snapshot(&dump).unwrap();
            // Dropped without close: recovery must come out of the
            // restored state, not the earlier snapshot.
        }

        let engine = reopen(EngineType::Hash, &data_dir);
        assert_eq!(engine.count().unwrap(), 1);
        assert_eq!(engine.get(b"only").unwrap(), Some(b"this".to_vec()));
        assert_eq!(engine.get(b"stale").unwrap(), None);
        engine.close().unwrap();
    }

    #[test]
    fn test_restore_with_persistence_rewrites_wal() {
        let tmp = TempDir::new().unwrap();
        let dump = tmp.path().join("export.data");

        let source = memory_engine(EngineType::Hash);
        source.set(b"only", b"this").unwrap();
        source.export_snapshot(&dump).unwrap();

        let data_dir = tmp.path().join("db");
        {
            let engine = Engine::open(durable_config(EngineType::Hash, &data_dir)).unwrap();
            engine.set(b"doomed", b"overwritten").unwrap();
            engine.restore_snapshot(&dump).unwrap();
            // Dropped without close: recovery must come out of the
            // rewritten WAL, not the pre-restore records.
        }

        let engine = reopen(EngineType::Hash, &data_dir);
        assert_eq!(engine.count().unwrap(), 1);
        assert_eq!(engine.get(b"only").unwrap(), Some(b"this".to_vec()));
        assert_eq!(engine.get(b"doomed").unwrap(), None);
        engine.close().unwrap();
    }
}
