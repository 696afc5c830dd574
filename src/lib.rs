//! # ConcordKV
//!
//! A pluggable, embeddable key-value **storage core** with crash-safe
//! durability and multi-isolation transactions. One engine abstraction,
//! four interchangeable in-memory backends, a write-ahead log plus
//! snapshot subsystem for recovery, and a portable transaction layer on
//! top of any backend.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                       Engine                           │
//! │  ┌───────────┐ ┌──────────┐ ┌──────────┐ ┌──────────┐  │
//! │  │   Array   │ │ RB-Tree  │ │   Hash   │ │  B+Tree  │  │
//! │  │  backend  │ │ backend  │ │ backend  │ │ backend  │  │
//! │  └───────────┘ └──────────┘ └────┬─────┘ └──────────┘  │
//! │                                  │ tree-promoted       │
//! │                                  ▼ buckets             │
//! │  ┌──────────────────────────────────────────────────┐  │
//! │  │        Persistence (WAL + snapshot manager)      │  │
//! │  └──────────────────────────────────────────────────┘  │
//! │  ┌──────────────────────────────────────────────────┐  │
//! │  │   Transactions (4 isolation levels, undo log)    │  │
//! │  └──────────────────────────────────────────────────┘  │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Uniform operation surface, state machine, lock discipline, stats |
//! | [`backend`] | Pluggable storage backends behind one capability trait |
//! | [`wal`] | Sequenced append-only log with recovery replay and compaction |
//! | [`snapshot`] | Point-in-time full-state dumps, latest-by-sequence selection |
//! | [`persist`] | WAL + snapshot bound under one data directory and lifecycle |
//! | [`txn`] | Begin/commit/rollback with four isolation levels |
//! | [`types`] | Key/value records, batches, ranges, shard-key hashing |
//!
//! ## Key Features
//!
//! - **Write-ahead logging** — every mutation is sequenced and persisted
//!   before the backend applies it; recovery replays the log on top of
//!   the latest snapshot.
//! - **Pluggable backends** — array, red-black tree, hash with
//!   tree-promoted buckets, and a skeletal B+Tree share one contract;
//!   promotion and demotion are invisible through the API.
//! - **Crash tolerance** — torn WAL tails terminate replay cleanly and
//!   are truncated away; snapshot files are CRC32-checked and written
//!   atomically.
//! - **Transactions** — `READ_UNCOMMITTED`, `READ_COMMITTED`,
//!   `REPEATABLE_READ`, and `SERIALIZABLE` over any backend, with
//!   reverse-order undo from captured old values.
//! - **Cluster hooks** — replay callback, snapshot save/load, and a
//!   stable shard-key hash for the routing layer above.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use concordkv::engine::{Engine, EngineConfig};
//! use concordkv::backend::EngineType;
//! use concordkv::txn::{IsolationLevel, TxnManager};
//!
//! let config = EngineConfig {
//!     engine_type: EngineType::Hash,
//!     data_dir: Some("/tmp/concordkv".into()),
//!     ..EngineConfig::default()
//! };
//! let engine = Engine::open(config).unwrap();
//!
//! // Point operations
//! engine.set(b"hello", b"world").unwrap();
//! assert_eq!(engine.get(b"hello").unwrap(), Some(b"world".to_vec()));
//! engine.delete(b"hello").unwrap();
//!
//! // Transactions
//! let manager = TxnManager::default();
//! let mut txn = manager
//!     .begin(&engine, Some(IsolationLevel::RepeatableRead))
//!     .unwrap();
//! txn.set(b"a", b"1").unwrap();
//! assert_eq!(txn.get(b"a").unwrap(), Some(b"1".to_vec()));
//! txn.commit().unwrap();
//!
//! // Graceful shutdown (final sync + snapshot)
//! engine.close().unwrap();
//! ```

#![allow(dead_code)]

pub mod backend;
pub mod engine;
pub mod persist;
pub mod snapshot;
pub mod txn;
pub mod types;
pub mod wal;

pub use backend::EngineType;
pub use engine::{Engine, EngineConfig, EngineError, EngineState, EngineStats};
pub use txn::{IsolationLevel, Transaction, TxnManager};
pub use types::{Batch, KeyRange, KvPair, KvRecord, shard_hash};
