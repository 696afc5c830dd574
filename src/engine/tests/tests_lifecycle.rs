//! State machine and lifecycle tests.

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::backend::EngineType;
    use crate::engine::tests::helpers::{durable_config, memory_engine};
    use crate::engine::{Engine, EngineError, EngineState};

    #[test]
    fn test_engine_runs_after_open() {
        let engine = memory_engine(EngineType::Hash);
        assert_eq!(engine.state(), EngineState::Running);
        assert_eq!(engine.engine_type(), EngineType::Hash);
    }

    #[test]
    fn test_operations_rejected_after_close() {
        let engine = memory_engine(EngineType::RbTree);
        engine.set(b"k", b"v").unwrap();
        engine.close().unwrap();
        assert_eq!(engine.state(), EngineState::Shutdown);

        for err in [
            engine.set(b"k", b"v2").unwrap_err(),
            engine.get(b"k").unwrap_err(),
            engine.delete(b"k").unwrap_err(),
            engine.flush().unwrap_err(),
            engine.compact().unwrap_err(),
            engine.create_iterator().err().unwrap(),
        ] {
            assert!(
                matches!(
                    err,
                    EngineError::State {
                        state: EngineState::Shutdown
                    }
                ),
                "expected a state error, got {err}"
            );
        }
    }

    #[test]
    fn test_close_is_idempotent() {
        let engine = memory_engine(EngineType::Array);
        engine.close().unwrap();
        engine.close().unwrap();
    }

    #[test]
    fn test_clones_share_state() {
        let engine = memory_engine(EngineType::Hash);
        let other = engine.clone();
        engine.set(b"k", b"v").unwrap();
        assert_eq!(other.get(b"k").unwrap(), Some(b"v".to_vec()));

        other.close().unwrap();
        assert_eq!(engine.state(), EngineState::Shutdown);
    }

    #[test]
    fn test_flush_sync_and_compact_keep_running() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(durable_config(EngineType::Hash, tmp.path())).unwrap();
        for i in 0..20u32 {
            engine.set(format!("k{i}").as_bytes(), b"v").unwrap();
        }

        engine.flush().unwrap();
        engine.sync().unwrap();
        engine.compact().unwrap();
        assert_eq!(engine.state(), EngineState::Running);
        assert_eq!(engine.count().unwrap(), 20);
        engine.close().unwrap();
    }

    #[test]
    fn test_flush_without_persistence_is_a_no_op() {
        let engine = memory_engine(EngineType::BTree);
        engine.set(b"k", b"v").unwrap();
        engine.flush().unwrap();
        engine.sync().unwrap();
        engine.compact().unwrap();
        assert_eq!(engine.get(b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_background_maintenance_runs_and_stops() {
        let tmp = TempDir::new().unwrap();
        let mut config = durable_config(EngineType::Hash, tmp.path());
        config.maintenance = true;
        config.maintenance_interval = std::time::Duration::from_millis(20);
        config.wal.compact_threshold = 4;

        let engine = Engine::open(config).unwrap();
        for i in 0..50u32 {
            engine.set(format!("k{i}").as_bytes(), b"v").unwrap();
        }
        // Give the ticker a few periods to fire the compaction trigger.
        std::thread::sleep(std::time::Duration::from_millis(200));

        assert_eq!(engine.count().unwrap(), 50);
        // close() joins the maintenance thread; if it deadlocked or
        // panicked this would hang or fail.
        engine.close().unwrap();
    }
}
