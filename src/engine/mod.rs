//! # Storage Engine
//!
//! The uniform operation surface over every pluggable backend, plus the
//! durability wiring that makes mutations crash-safe.
//!
//! ## Design Overview
//!
//! An [`Engine`] owns one [`Backend`] behind a single `Arc<RwLock<_>>`.
//! Reads acquire the read lock; every mutating call holds the write lock
//! for its full duration, so backends never observe concurrency. When a
//! data directory is configured, each mutation is appended to the
//! write-ahead log **before** it touches the backend; a failed append
//! leaves the backend untouched.
//!
//! ```text
//! client ──► engine op ──► [transaction] ──► WAL append ──► backend ──► reply
//! ```
//!
//! ## Lifecycle
//!
//! [`Engine::open`] builds the backend from [`EngineConfig`], recovers
//! durable state (latest snapshot, then WAL records beyond it), starts
//! the background maintenance task, and transitions to
//! [`EngineState::Running`]. [`Engine::close`] flushes, writes a final
//! snapshot, transitions to `Shutdown`, and joins the maintenance thread.
//! Mutations are accepted only while the engine is `Running` (or
//! transiently `Compacting` / `Flushing`).
//!
//! ## Validity short-circuit
//!
//! Parameter validity (empty or oversized keys) and engine state are
//! checked before any backend dispatch, surfacing
//! [`EngineError::Param`] / [`EngineError::State`] without entering the
//! backend.
//!
//! ## Transactions
//!
//! The portable transaction layer lives in [`crate::txn`]; it lowers all
//! transactional mutations onto the same single apply path used by the
//! plain operations here. A coarse transaction gate (shared by plain
//! writers, exclusive for SERIALIZABLE transactions) sits in front of
//! that path.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backend::array::{ArrayBackend, DEFAULT_ARRAY_CAPACITY};
use crate::backend::btree::{BTreeBackend, DEFAULT_MAX_KEYS_PER_NODE, DEFAULT_PAGE_SIZE};
use crate::backend::hash::{DEFAULT_INITIAL_BUCKETS, DEFAULT_LOAD_FACTOR, HashBackend};
use crate::backend::rbtree::RbTreeBackend;
use crate::backend::{Backend, BackendError, EngineType};
use crate::persist::{MaintenanceHandle, Persistence, PersistError, RecoveryReport};
use crate::snapshot::{self, SnapshotError, SnapshotInfo};
use crate::types::{Batch, KeyRange, KvPair, KvRecord};
use crate::wal::{Wal, WalError, WalOp, WalOptions, WalRecord};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Default bound on key length, matching the inline-key mode of the hash
/// backend's wire-facing adapter.
pub const DEFAULT_MAX_KEY_LEN: usize = 128;

/// Default period of the background maintenance task.
pub const DEFAULT_MAINTENANCE_INTERVAL: Duration =
    Duration::from_secs(crate::wal::WAL_SYNC_INTERVAL_SECS);

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// Null or invalid input, rejected before backend dispatch.
    #[error("invalid parameter: {0}")]
    Param(&'static str),

    /// The engine is not in a state that accepts this operation.
    #[error("engine is {state:?}; operation rejected")]
    State {
        /// State the engine was in.
        state: EngineState,
    },

    /// The operation or configuration is not supported.
    #[error("{0} is not supported")]
    NotSupported(&'static str),

    /// The configured soft memory cap would be exceeded.
    #[error("memory limit exceeded ({limit} bytes)")]
    MemoryLimit {
        /// The configured cap.
        limit: usize,
    },

    /// Error reported by the backend.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Error from the persistence façade.
    #[error("persistence error: {0}")]
    Persist(#[from] PersistError),

    /// Error from the write-ahead log.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Error from the snapshot subsystem.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    /// Internal invariant violation (poisoned lock, unexpected state).
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// State machine
// ------------------------------------------------------------------------------------------------

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Created, not yet recovered.
    Init,
    /// Serving reads and writes.
    Running,
    /// Compaction in progress; mutations still accepted.
    Compacting,
    /// Flush in progress; mutations still accepted.
    Flushing,
    /// Unrecoverable fault; all operations rejected.
    Error,
    /// Closed; all operations rejected.
    Shutdown,
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Configuration for an [`Engine`] instance.
///
/// Carries every recognized option; backends read the fields scoped to
/// them and ignore the rest. `cache_size`, `enable_compression`, and
/// `enable_checksum` are accepted and recorded for per-backend
/// interpretation; the in-memory backends currently interpret none of
/// them. The LSM tuning fields configure a backend the core declares but
/// does not ship — selecting [`EngineType::Lsm`] reports
/// [`EngineError::NotSupported`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Backend selection.
    pub engine_type: EngineType,
    /// Root directory for WAL + snapshots; `None` runs pure in-memory.
    pub data_dir: Option<PathBuf>,
    /// Upper bound on key length, enforced before dispatch.
    pub max_key_len: usize,
    /// Soft cap on in-memory footprint in bytes; 0 disables the cap.
    pub memory_limit: usize,
    /// Bytes reserved for a read cache (recorded; no backend uses it yet).
    pub cache_size: usize,
    /// Per-backend compression toggle (recorded).
    pub enable_compression: bool,
    /// Per-backend checksum toggle (recorded).
    pub enable_checksum: bool,
    /// Array backend: slot capacity.
    pub array_capacity: usize,
    /// Hash backend: initial bucket count (rounded up to a power of two).
    pub initial_buckets: usize,
    /// Hash backend: mean chain length before the table doubles.
    pub load_factor: f64,
    /// B+Tree backend: page size.
    pub page_size: usize,
    /// B+Tree backend: separator fan-out.
    pub max_keys_per_node: usize,
    /// LSM tuning: memtable size (declared; unused by the core).
    pub memtable_size: usize,
    /// LSM tuning: level-0 file limit (declared; unused by the core).
    pub level0_file_limit: usize,
    /// LSM tuning: level size multiplier (declared; unused by the core).
    pub level_size_multiplier: usize,
    /// Write-ahead log tunables, including `sync_write`.
    pub wal: WalOptions,
    /// Period of the background maintenance task.
    pub maintenance_interval: Duration,
    /// Whether to run the background maintenance task at all.
    pub maintenance: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine_type: EngineType::Hash,
            data_dir: None,
            max_key_len: DEFAULT_MAX_KEY_LEN,
            memory_limit: 0,
            cache_size: 0,
            enable_compression: false,
            enable_checksum: false,
            array_capacity: DEFAULT_ARRAY_CAPACITY,
            initial_buckets: DEFAULT_INITIAL_BUCKETS,
            load_factor: DEFAULT_LOAD_FACTOR,
            page_size: DEFAULT_PAGE_SIZE,
            max_keys_per_node: DEFAULT_MAX_KEYS_PER_NODE,
            memtable_size: 4 * 1024 * 1024,
            level0_file_limit: 4,
            level_size_multiplier: 10,
            wal: WalOptions::default(),
            maintenance_interval: DEFAULT_MAINTENANCE_INTERVAL,
            maintenance: true,
        }
    }
}

/// Builds the backend selected by `config`.
fn create_backend(config: &EngineConfig) -> Result<Box<dyn Backend>, EngineError> {
    match config.engine_type {
        EngineType::Array => Ok(Box::new(ArrayBackend::new(config.array_capacity))),
        EngineType::RbTree => Ok(Box::new(RbTreeBackend::new())),
        EngineType::Hash => Ok(Box::new(HashBackend::new(
            config.initial_buckets,
            config.load_factor,
        ))),
        EngineType::BTree => Ok(Box::new(BTreeBackend::new(
            config.max_keys_per_node,
            config.page_size,
        ))),
        EngineType::Lsm => Err(EngineError::NotSupported(
            "the LSM backend is declared for cluster configuration but not shipped by the core",
        )),
    }
}

// ------------------------------------------------------------------------------------------------
// Statistics
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Counters {
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    snapshots: AtomicU64,
}

/// Snapshot of engine statistics returned by [`Engine::stats`].
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Point reads served.
    pub reads: u64,
    /// Sets and updates applied.
    pub writes: u64,
    /// Deletes applied.
    pub deletes: u64,
    /// Reads that found a value.
    pub hits: u64,
    /// Reads that found nothing.
    pub misses: u64,
    /// Snapshots written.
    pub snapshots: u64,
    /// Distinct keys currently stored.
    pub count: usize,
    /// Total payload bytes currently stored.
    pub size_bytes: usize,
    /// Approximate in-memory footprint.
    pub memory_usage: usize,
}

// ------------------------------------------------------------------------------------------------
// Engine core
// ------------------------------------------------------------------------------------------------

struct EngineInner {
    backend: Box<dyn Backend>,
    state: EngineState,
    config: EngineConfig,
    persist: Option<Persistence>,
    maintenance: Option<MaintenanceHandle>,
}

impl EngineInner {
    fn check_accepting(&self) -> Result<(), EngineError> {
        match self.state {
            EngineState::Running | EngineState::Compacting | EngineState::Flushing => Ok(()),
            state => Err(EngineError::State { state }),
        }
    }

    fn validate_key(&self, key: &[u8]) -> Result<(), EngineError> {
        if key.is_empty() {
            return Err(EngineError::Param("key must not be empty"));
        }
        if key.len() > self.config.max_key_len {
            return Err(EngineError::Param("key exceeds configured maximum length"));
        }
        Ok(())
    }

    /// Soft memory cap, checked before the WAL append so a rejected
    /// mutation leaves no log record behind.
    fn check_memory(&self, incoming: usize) -> Result<(), EngineError> {
        let limit = self.config.memory_limit;
        if limit > 0 && self.backend.memory_usage() + incoming > limit {
            return Err(EngineError::MemoryLimit { limit });
        }
        Ok(())
    }
}

/// The storage engine handle.
///
/// Thread-safe and cheaply cloneable; clones share the same backend,
/// lock, statistics, and persistence.
pub struct Engine {
    inner: Arc<RwLock<EngineInner>>,
    gate: Arc<parking_lot::RwLock<()>>,
    counters: Arc<Counters>,
}

impl Clone for Engine {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            gate: Arc::clone(&self.gate),
            counters: Arc::clone(&self.counters),
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

/// Applies one recovered WAL record straight to a backend.
fn apply_recovered(backend: &mut dyn Backend, record: &WalRecord) -> Result<(), WalError> {
    let value = record.value.as_deref().unwrap_or(&[]);
    let result = match record.op {
        WalOp::Set | WalOp::Modify => backend.set(&record.key, value),
        WalOp::Delete => match backend.delete(&record.key) {
            // A delete can outlive its key when the log was compacted
            // around a snapshot boundary; harmless on replay.
            Err(BackendError::NotFound) => {
                debug!(seq = record.seq, "replayed delete for absent key");
                Ok(())
            }
            other => other,
        },
    };
    result.map_err(|e| WalError::Internal(format!("replay apply failed: {e}")))
}

impl Engine {
    /// Opens an engine: builds the configured backend, recovers durable
    /// state when a data directory is set, starts maintenance, and
    /// transitions to `Running`.
    pub fn open(config: EngineConfig) -> Result<Self, EngineError> {
        let mut backend = create_backend(&config)?;
        let state = EngineState::Init;
        debug!(engine_type = ?config.engine_type, state = ?state, "engine created");

        let mut report = RecoveryReport::default();
        let persist = match &config.data_dir {
            Some(dir) => {
                let persist = Persistence::open(dir, config.wal.clone())?;
                report = persist.recover(|record| apply_recovered(backend.as_mut(), record))?;
                info!(
                    snapshot_seq = ?report.snapshot_seq,
                    replayed = report.replay.applied,
                    next_seq = persist.wal().next_seq(),
                    "engine state recovered"
                );
                Some(persist)
            }
            None => None,
        };

        let wal = persist.as_ref().map(|p| Arc::clone(p.wal()));
        let run_maintenance = config.maintenance && wal.is_some();
        let interval = config.maintenance_interval;

        let inner = EngineInner {
            backend,
            state: EngineState::Running,
            config,
            persist,
            maintenance: None,
        };
        let engine = Self {
            inner: Arc::new(RwLock::new(inner)),
            gate: Arc::new(parking_lot::RwLock::new(())),
            counters: Arc::new(Counters::default()),
        };

        if run_maintenance {
            if let Some(wal) = wal {
                let weak = Arc::downgrade(&engine.inner);
                let handle = MaintenanceHandle::start("concordkv-maintenance", interval, move || {
                    Self::maintenance_tick(&weak, &wal)
                });
                engine.write_inner()?.maintenance = Some(handle);
            }
        }

        info!(replayed = report.replay.applied, "engine running");
        Ok(engine)
    }

    fn read_inner(&self) -> Result<RwLockReadGuard<'_, EngineInner>, EngineError> {
        self.inner
            .read()
            .map_err(|_| EngineError::Internal("engine lock poisoned".into()))
    }

    fn write_inner(&self) -> Result<RwLockWriteGuard<'_, EngineInner>, EngineError> {
        self.inner
            .write()
            .map_err(|_| EngineError::Internal("engine lock poisoned".into()))
    }

    /// One pass of the background maintenance task: incremental WAL sync
    /// plus the compaction trigger. Returns `false` once the engine has
    /// been dropped.
    fn maintenance_tick(weak: &Weak<RwLock<EngineInner>>, wal: &Arc<Wal>) -> bool {
        let Some(inner_arc) = weak.upgrade() else {
            return false;
        };
        if let Err(e) = wal.sync_incremental() {
            warn!(error = %e, "incremental WAL sync failed");
        }

        let live = match inner_arc.read() {
            Ok(guard) if guard.state == EngineState::Running => guard.backend.count(),
            _ => return true,
        };
        if wal.needs_compaction(live) {
            if let Ok(mut guard) = inner_arc.write() {
                if guard.state != EngineState::Running {
                    return true;
                }
                guard.state = EngineState::Compacting;
                let entries = guard.backend.entries();
                if let Err(e) = wal.compact(&entries) {
                    warn!(error = %e, "background WAL compaction failed");
                }
                guard.state = EngineState::Running;
            }
        }
        true
    }

    // --------------------------------------------------------------------------------------------
    // Lowered mutation path
    // --------------------------------------------------------------------------------------------

    /// The single mutation path: validity short-circuit, WAL append,
    /// then backend apply, all under the engine write lock.
    ///
    /// Both the plain operations and the transaction layer (eager apply
    /// and deferred commit) lower onto this; the transaction gate is the
    /// caller's business.
    pub(crate) fn apply_op(
        &self,
        op: WalOp,
        key: &[u8],
        value: Option<&[u8]>,
    ) -> Result<(), EngineError> {
        let mut inner = self.write_inner()?;
        inner.check_accepting()?;
        inner.validate_key(key)?;

        match op {
            WalOp::Set => {
                let value = value.unwrap_or(&[]);
                inner.check_memory(key.len() + value.len())?;
                inner.backend.ensure_capacity(key)?;
                if let Some(p) = &inner.persist {
                    p.wal().append(WalOp::Set, key, Some(value))?;
                }
                inner.backend.set(key, value)?;
                self.counters.writes.fetch_add(1, Ordering::Relaxed);
            }
            WalOp::Delete => {
                if inner.backend.get(key).is_none() {
                    return Err(BackendError::NotFound.into());
                }
                if let Some(p) = &inner.persist {
                    p.wal().append(WalOp::Delete, key, None)?;
                }
                inner.backend.delete(key)?;
                self.counters.deletes.fetch_add(1, Ordering::Relaxed);
            }
            WalOp::Modify => {
                let value = value.unwrap_or(&[]);
                if inner.backend.get(key).is_none() {
                    return Err(BackendError::NotFound.into());
                }
                inner.check_memory(value.len())?;
                if let Some(p) = &inner.persist {
                    p.wal().append(WalOp::Modify, key, Some(value))?;
                }
                inner.backend.update(key, value)?;
                self.counters.writes.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// The coarse transaction gate: plain writers take it shared,
    /// SERIALIZABLE transactions exclusively for their whole lifetime.
    pub(crate) fn txn_gate(&self) -> &Arc<parking_lot::RwLock<()>> {
        &self.gate
    }

    // --------------------------------------------------------------------------------------------
    // Point operations
    // --------------------------------------------------------------------------------------------

    /// Inserts `key` or replaces its value.
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<(), EngineError> {
        let _gate = self.gate.read();
        self.apply_op(WalOp::Set, key, Some(value))
    }

    /// Looks up `key`; `Ok(None)` means not found.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        let inner = self.read_inner()?;
        inner.check_accepting()?;
        inner.validate_key(key)?;

        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        let value = inner.backend.get(key);
        match value {
            Some(_) => self.counters.hits.fetch_add(1, Ordering::Relaxed),
            None => self.counters.misses.fetch_add(1, Ordering::Relaxed),
        };
        Ok(value)
    }

    /// Removes `key`, failing with [`BackendError::NotFound`] when absent.
    pub fn delete(&self, key: &[u8]) -> Result<(), EngineError> {
        let _gate = self.gate.read();
        self.apply_op(WalOp::Delete, key, None)
    }

    /// Replaces the value of an existing key; unlike [`set`](Self::set),
    /// fails with [`BackendError::NotFound`] when the key is absent.
    pub fn update(&self, key: &[u8], value: &[u8]) -> Result<(), EngineError> {
        let _gate = self.gate.read();
        self.apply_op(WalOp::Modify, key, Some(value))
    }

    // --------------------------------------------------------------------------------------------
    // Batch operations
    // --------------------------------------------------------------------------------------------

    /// Applies each record of `batch` independently: tombstone records
    /// delete, the rest set. Partial success is reported per record.
    pub fn batch_set(&self, batch: &Batch) -> Vec<Result<(), EngineError>> {
        batch
            .iter()
            .map(|record| {
                if record.deleted {
                    self.delete(&record.key)
                } else {
                    match &record.value {
                        Some(value) => self.set(&record.key, value),
                        None => Err(EngineError::Param("set record carries no value")),
                    }
                }
            })
            .collect()
    }

    /// Fills in the value of every record in place; records whose key is
    /// absent come back with `value == None`.
    pub fn batch_get(&self, batch: &mut Batch) -> Result<(), EngineError> {
        for record in batch.records_mut() {
            record.value = self.get(&record.key)?;
        }
        Ok(())
    }

    /// Deletes each key independently, reporting per-key results.
    pub fn batch_delete(&self, keys: &[Vec<u8>]) -> Vec<Result<(), EngineError>> {
        keys.iter().map(|key| self.delete(key)).collect()
    }

    // --------------------------------------------------------------------------------------------
    // Iteration and scans
    // --------------------------------------------------------------------------------------------

    /// Creates a stateful cursor over a point-in-time copy of the keys.
    ///
    /// The iterator snapshots (and sorts) the entries at creation instead
    /// of pinning the engine's read lock for its lifetime, so it never
    /// blocks writers and never observes later mutations.
    pub fn create_iterator(&self) -> Result<EngineIterator, EngineError> {
        let inner = self.read_inner()?;
        inner.check_accepting()?;
        let mut entries = inner.backend.entries();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(EngineIterator {
            entries,
            cursor: 0,
        })
    }

    /// Collects the pairs inside `range` into a batch — ordered for
    /// ordered backends, bucket order for hash.
    pub fn range_scan(&self, range: &KeyRange) -> Result<Batch, EngineError> {
        let inner = self.read_inner()?;
        inner.check_accepting()?;
        let pairs = inner.backend.range_scan(range);
        Ok(pairs_to_batch(pairs))
    }

    /// Collects up to `limit` pairs whose keys start with `prefix`.
    pub fn prefix_scan(&self, prefix: &[u8], limit: Option<usize>) -> Result<Batch, EngineError> {
        let inner = self.read_inner()?;
        inner.check_accepting()?;
        let pairs = inner.backend.prefix_scan(prefix, limit);
        Ok(pairs_to_batch(pairs))
    }

    // --------------------------------------------------------------------------------------------
    // Statistics
    // --------------------------------------------------------------------------------------------

    /// Number of distinct keys currently stored.
    pub fn count(&self) -> Result<usize, EngineError> {
        Ok(self.read_inner()?.backend.count())
    }

    /// Total payload bytes currently stored.
    pub fn size_bytes(&self) -> Result<usize, EngineError> {
        Ok(self.read_inner()?.backend.size_bytes())
    }

    /// Approximate in-memory footprint.
    pub fn memory_usage(&self) -> Result<usize, EngineError> {
        Ok(self.read_inner()?.backend.memory_usage())
    }

    /// Snapshot of operation counters and backend statistics.
    pub fn stats(&self) -> Result<EngineStats, EngineError> {
        let inner = self.read_inner()?;
        Ok(EngineStats {
            reads: self.counters.reads.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            snapshots: self.counters.snapshots.load(Ordering::Relaxed),
            count: inner.backend.count(),
            size_bytes: inner.backend.size_bytes(),
            memory_usage: inner.backend.memory_usage(),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        self.read_inner()
            .map(|inner| inner.state)
            .unwrap_or(EngineState::Error)
    }

    /// The backend type this engine was built with.
    pub fn engine_type(&self) -> EngineType {
        self.read_inner()
            .map(|inner| inner.config.engine_type)
            .unwrap_or(EngineType::Hash)
    }

    // --------------------------------------------------------------------------------------------
    // Lifecycle
    // --------------------------------------------------------------------------------------------

    /// Fsyncs pending WAL writes.
    pub fn sync(&self) -> Result<(), EngineError> {
        let inner = self.read_inner()?;
        inner.check_accepting()?;
        if let Some(p) = &inner.persist {
            p.wal().sync()?;
        }
        Ok(())
    }

    /// Persists pending state: full WAL fsync under the `Flushing` state.
    pub fn flush(&self) -> Result<(), EngineError> {
        let mut inner = self.write_inner()?;
        inner.check_accepting()?;
        let prev = inner.state;
        inner.state = EngineState::Flushing;
        let result = match &inner.persist {
            Some(p) => p.wal().sync().map_err(EngineError::from),
            None => Ok(()),
        };
        inner.state = prev;
        result
    }

    /// Compacts the backend and rewrites the WAL down to the live set.
    ///
    /// Holds the engine write lock throughout so the dumped live set and
    /// the truncated log cannot diverge.
    pub fn compact(&self) -> Result<(), EngineError> {
        let mut inner = self.write_inner()?;
        inner.check_accepting()?;
        inner.state = EngineState::Compacting;
        inner.backend.compact();

        let mut result = Ok(());
        if let Some(p) = &inner.persist {
            let entries = inner.backend.entries();
            if let Err(e) = p.wal().compact(&entries) {
                result = Err(e.into());
            }
        }
        inner.state = EngineState::Running;
        result
    }

    /// Gracefully shuts the engine down: final WAL sync and snapshot,
    /// transition to `Shutdown`, then stop and join maintenance.
    ///
    /// Idempotent; operations after close fail with
    /// [`EngineError::State`].
    pub fn close(&self) -> Result<(), EngineError> {
        let (maintenance, result) = {
            let mut inner = self.write_inner()?;
            if inner.state == EngineState::Shutdown {
                (inner.maintenance.take(), Ok(()))
            } else {
                inner.state = EngineState::Flushing;
                let result = Self::final_flush(&inner);
                inner.state = EngineState::Shutdown;
                (inner.maintenance.take(), result)
            }
        };
        if let Some(mut handle) = maintenance {
            handle.stop();
        }
        info!("engine closed");
        result
    }

    fn final_flush(inner: &EngineInner) -> Result<(), EngineError> {
        if let Some(p) = &inner.persist {
            p.wal().sync()?;
            let entries = inner.backend.entries();
            p.create_snapshot(&entries)?;
        }
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Snapshots
    // --------------------------------------------------------------------------------------------

    /// Writes a snapshot of the current state into the engine's snapshot
    /// directory, tagged with the WAL's current sequence.
    pub fn create_snapshot(&self) -> Result<SnapshotInfo, EngineError> {
        let inner = self.read_inner()?;
        inner.check_accepting()?;
        let Some(p) = &inner.persist else {
            return Err(EngineError::NotSupported(
                "snapshotting without a data directory",
            ));
        };
        let entries = inner.backend.entries();
        let info = p.create_snapshot(&entries)?;
        self.counters.snapshots.fetch_add(1, Ordering::Relaxed);
        Ok(info)
    }

    /// Dumps the current state as a snapshot file at an explicit path,
    /// outside the managed snapshot directory.
    pub fn export_snapshot(&self, path: &Path) -> Result<(), EngineError> {
        let inner = self.read_inner()?;
        inner.check_accepting()?;
        let seq = inner.persist.as_ref().map_or(0, |p| p.wal().current_seq());
        let entries = inner.backend.entries();
        snapshot::write_snapshot_file(path, seq, &entries)?;
        self.counters.snapshots.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Replaces the engine's contents with the state in a snapshot file.
    ///
    /// With persistence attached, the WAL is compacted down to the
    /// restored live set and a superseding managed snapshot is written,
    /// so the next recovery reproduces exactly the restored state.
    pub fn restore_snapshot(&self, path: &Path) -> Result<(), EngineError> {
        let _gate = self.gate.read();
        let (seq, entries) = snapshot::read_snapshot_file(path)?;

        let mut inner = self.write_inner()?;
        inner.check_accepting()?;
        inner.backend.clear();
        for pair in &entries {
            inner.backend.set(&pair.key, &pair.value)?;
        }
        if let Some(p) = &inner.persist {
            p.wal().compact(&entries)?;
            // The managed snapshot directory may still hold a pre-restore
            // dump with the highest sequence; recovery must never seed
            // from it. Writing a fresh snapshot at the compacted WAL's
            // current sequence supersedes it.
            p.create_snapshot(&entries)?;
            self.counters.snapshots.fetch_add(1, Ordering::Relaxed);
        }
        info!(path = %path.display(), seq, entries = entries.len(), "snapshot restored");
        Ok(())
    }
}

fn pairs_to_batch(pairs: Vec<KvPair>) -> Batch {
    Batch::from_records(
        pairs
            .into_iter()
            .map(|pair| KvRecord::put(pair.key, pair.value))
            .collect(),
    )
}

// ------------------------------------------------------------------------------------------------
// Iterator
// ------------------------------------------------------------------------------------------------

/// Stateful cursor over a sorted point-in-time copy of the engine's
/// entries.
///
/// The cursor sits **between** elements: [`next`](Self::next) yields the
/// element after it and advances, [`prev`](Self::prev) yields the element
/// before it and retreats, and [`seek`](Self::seek) places it so that the
/// following `next` yields the first key `>= target`.
#[derive(Debug)]
pub struct EngineIterator {
    entries: Vec<KvPair>,
    cursor: usize,
}

impl EngineIterator {
    /// Yields the next pair and advances.
    pub fn next(&mut self) -> Option<&KvPair> {
        if self.cursor < self.entries.len() {
            let item = &self.entries[self.cursor];
            self.cursor += 1;
            Some(item)
        } else {
            None
        }
    }

    /// Yields the previous pair and retreats.
    pub fn prev(&mut self) -> Option<&KvPair> {
        if self.cursor > 0 {
            self.cursor -= 1;
            Some(&self.entries[self.cursor])
        } else {
            None
        }
    }

    /// Positions the cursor at the first key `>= target`.
    pub fn seek(&mut self, target: &[u8]) {
        self.cursor = self
            .entries
            .partition_point(|pair| pair.key.as_slice() < target);
    }

    /// Moves the cursor back to the start.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Number of entries the snapshot holds.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the snapshot holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
