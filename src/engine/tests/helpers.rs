use std::path::Path;

use tracing_subscriber::EnvFilter;

use crate::backend::EngineType;
use crate::engine::{Engine, EngineConfig};

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times — only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Every backend the engine can be opened with.
pub fn all_backends() -> [EngineType; 4] {
    [
        EngineType::Array,
        EngineType::RbTree,
        EngineType::Hash,
        EngineType::BTree,
    ]
}

/// Pure in-memory config; background maintenance off so tests control
/// every WAL interaction themselves.
pub fn memory_config(engine_type: EngineType) -> EngineConfig {
    init_tracing();
    EngineConfig {
        engine_type,
        maintenance: false,
        ..EngineConfig::default()
    }
}

/// Durable config rooted at `path`, maintenance off.
pub fn durable_config(engine_type: EngineType, path: &Path) -> EngineConfig {
    init_tracing();
    EngineConfig {
        engine_type,
        data_dir: Some(path.to_path_buf()),
        maintenance: false,
        ..EngineConfig::default()
    }
}

/// Opens a pure in-memory engine of the given type.
pub fn memory_engine(engine_type: EngineType) -> Engine {
    Engine::open(memory_config(engine_type)).expect("open")
}

/// Reopens a durable engine on an existing data directory.
pub fn reopen(engine_type: EngineType, path: &Path) -> Engine {
    Engine::open(durable_config(engine_type, path)).expect("reopen")
}

/// Sorted `(key, value)` dump via the engine iterator.
pub fn sorted_entries(engine: &Engine) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut iter = engine.create_iterator().expect("iterator");
    let mut out = Vec::new();
    while let Some(pair) = iter.next() {
        out.push((pair.key.clone(), pair.value.clone()));
    }
    out
}
