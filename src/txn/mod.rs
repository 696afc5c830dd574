//! # Transaction Layer
//!
//! Begin/commit/rollback over any backend, with four isolation levels.
//! The layer is portable: it records operations against an [`Engine`]
//! and lowers every mutation onto the engine's single apply path —
//! either eagerly at record time or from the op list at commit.
//!
//! ## Visibility policies
//!
//! | Level | Mutations | Reads |
//! |-------|-----------|-------|
//! | `ReadUncommitted` | applied eagerly | straight from the backend |
//! | `ReadCommitted` (default) | deferred to commit | straight from the backend |
//! | `RepeatableRead` | deferred to commit | own op list first, then backend |
//! | `Serializable` | deferred to commit | own op list first, then backend |
//!
//! `Serializable` additionally holds the engine's transaction gate
//! exclusively for the whole transaction: plain engine writers and other
//! transactions' commits take the gate shared, so nothing else can write
//! while a serializable transaction is open. Coarse, but correct. Reads
//! do not touch the gate. Two serializable transactions must not be
//! opened on the same thread — the second blocks on the first.
//!
//! ## Commit failure policy
//!
//! If applying a deferred op fails mid-commit, the transaction **aborts
//! and rolls back**: already-applied ops are undone in reverse order
//! using their captured old values, the status becomes `Aborted`, and
//! [`TxnError::CommitAborted`] reports the failing op. The engine is
//! never poisoned.
//!
//! ## Manager
//!
//! [`TxnManager`] is explicit process-wide state: the host constructs it
//! before opening transactions (no lazy singletons), it assigns monotonic
//! transaction ids, tracks the active-transaction count, and supplies the
//! default isolation level. No cross-transaction conflict detection is
//! performed at this layer.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::SystemTime;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::engine::{Engine, EngineError};
use crate::wal::WalOp;

type GateGuard = parking_lot::lock_api::ArcRwLockWriteGuard<parking_lot::RawRwLock, ()>;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors surfaced by transactional operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TxnError {
    /// Operation on a transaction that already committed or aborted.
    #[error("transaction {id} is {status:?}; no further operations allowed")]
    Inactive {
        /// Transaction id.
        id: u64,
        /// Terminal status it reached.
        status: TxnStatus,
    },

    /// `modify` on a key that does not exist at record time.
    #[error("key not found")]
    NotFound,

    /// Error from the underlying engine.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// A deferred op failed mid-commit; the transaction rolled back.
    #[error("commit failed at op {index}: {source}; transaction rolled back")]
    CommitAborted {
        /// Index of the failing op in the transaction's op list.
        index: usize,
        /// The apply error.
        source: EngineError,
    },
}

// ------------------------------------------------------------------------------------------------
// Isolation levels and status
// ------------------------------------------------------------------------------------------------

/// Visibility contract between concurrent transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Mutations hit the backend immediately; rollback undoes them.
    ReadUncommitted,
    /// Mutations deferred to commit; reads see the live backend.
    #[default]
    ReadCommitted,
    /// Deferred mutations; reads see the transaction's own writes first.
    RepeatableRead,
    /// `RepeatableRead` plus exclusive write access for the whole
    /// transaction.
    Serializable,
}

impl IsolationLevel {
    /// Whether mutations are applied at record time rather than commit.
    fn is_eager(self) -> bool {
        matches!(self, Self::ReadUncommitted)
    }

    /// Whether reads consult the transaction's own op list first.
    fn reads_own_writes(self) -> bool {
        matches!(self, Self::RepeatableRead | Self::Serializable)
    }
}

/// Lifecycle status of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnStatus {
    /// Accepting operations.
    Active,
    /// Commit completed; terminal.
    Committed,
    /// Rolled back (explicitly, on commit failure, or on drop); terminal.
    Aborted,
}

// ------------------------------------------------------------------------------------------------
// Recorded operations
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnOpKind {
    Set,
    Delete,
    Modify,
}

impl TxnOpKind {
    fn wal_op(self) -> WalOp {
        match self {
            Self::Set => WalOp::Set,
            Self::Delete => WalOp::Delete,
            Self::Modify => WalOp::Modify,
        }
    }
}

/// One recorded operation: what to apply, and what to restore on undo.
#[derive(Debug, Clone)]
struct TxnOp {
    kind: TxnOpKind,
    key: Vec<u8>,
    value: Option<Vec<u8>>,
    /// Backend value at record time; `None` when the key was absent.
    old_value: Option<Vec<u8>>,
}

// ------------------------------------------------------------------------------------------------
// Manager
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Default)]
struct TxnShared {
    next_id: AtomicU64,
    active: AtomicUsize,
}

/// Process-wide transaction bookkeeping: monotonic ids, active count,
/// default isolation level.
#[derive(Debug)]
pub struct TxnManager {
    shared: Arc<TxnShared>,
    default_isolation: IsolationLevel,
}

impl Default for TxnManager {
    fn default() -> Self {
        Self::new(IsolationLevel::default())
    }
}

impl TxnManager {
    /// Creates a manager handing out the given default isolation level.
    pub fn new(default_isolation: IsolationLevel) -> Self {
        Self {
            shared: Arc::new(TxnShared {
                next_id: AtomicU64::new(1),
                active: AtomicUsize::new(0),
            }),
            default_isolation,
        }
    }

    /// The isolation level used when [`begin`](Self::begin) is passed
    /// `None`.
    pub fn default_isolation(&self) -> IsolationLevel {
        self.default_isolation
    }

    /// Number of transactions currently active.
    pub fn active_count(&self) -> usize {
        self.shared.active.load(Ordering::Relaxed)
    }

    /// Opens a transaction against `engine`.
    ///
    /// A `Serializable` transaction blocks here until every plain writer
    /// and every other serializable transaction has released the engine's
    /// transaction gate, then holds it until commit or rollback.
    pub fn begin(
        &self,
        engine: &Engine,
        isolation: Option<IsolationLevel>,
    ) -> Result<Transaction, TxnError> {
        let isolation = isolation.unwrap_or(self.default_isolation);
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);

        let gate = if isolation == IsolationLevel::Serializable {
            Some(engine.txn_gate().write_arc())
        } else {
            None
        };

        self.shared.active.fetch_add(1, Ordering::Relaxed);
        debug!(id, ?isolation, "transaction begun");
        Ok(Transaction {
            id,
            isolation,
            status: TxnStatus::Active,
            start_time: SystemTime::now(),
            end_time: None,
            ops: Vec::new(),
            engine: engine.clone(),
            shared: Arc::clone(&self.shared),
            gate,
        })
    }
}

// ------------------------------------------------------------------------------------------------
// Transaction
// ------------------------------------------------------------------------------------------------

/// An open transaction. Obtained from [`TxnManager::begin`].
///
/// A transaction still `Active` when dropped is rolled back with a
/// warning.
#[derive(Debug)]
pub struct Transaction {
    id: u64,
    isolation: IsolationLevel,
    status: TxnStatus,
    start_time: SystemTime,
    end_time: Option<SystemTime>,
    ops: Vec<TxnOp>,
    engine: Engine,
    shared: Arc<TxnShared>,
    gate: Option<GateGuard>,
}

impl Transaction {
    /// Transaction id, monotonic per manager.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Isolation level this transaction runs under.
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    /// Current lifecycle status.
    pub fn status(&self) -> TxnStatus {
        self.status
    }

    /// When the transaction began.
    pub fn start_time(&self) -> SystemTime {
        self.start_time
    }

    /// When the transaction committed or aborted, once terminal.
    pub fn end_time(&self) -> Option<SystemTime> {
        self.end_time
    }

    /// Number of recorded operations.
    pub fn op_count(&self) -> usize {
        self.ops.len()
    }

    fn ensure_active(&self) -> Result<(), TxnError> {
        if self.status == TxnStatus::Active {
            Ok(())
        } else {
            Err(TxnError::Inactive {
                id: self.id,
                status: self.status,
            })
        }
    }

    // --------------------------------------------------------------------------------------------
    // Operations
    // --------------------------------------------------------------------------------------------

    /// Records (or, under `ReadUncommitted`, immediately applies) a set.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), TxnError> {
        self.ensure_active()?;
        let old_value = self.engine.get(key)?;
        if self.isolation.is_eager() {
            self.engine.apply_op(WalOp::Set, key, Some(value))?;
        }
        self.ops.push(TxnOp {
            kind: TxnOpKind::Set,
            key: key.to_vec(),
            value: Some(value.to_vec()),
            old_value,
        });
        Ok(())
    }

    /// Records (or immediately applies) a delete.
    ///
    /// Under eager isolation a delete of an absent key fails right away;
    /// deferred transactions record it and surface the failure at commit.
    pub fn delete(&mut self, key: &[u8]) -> Result<(), TxnError> {
        self.ensure_active()?;
        let old_value = self.engine.get(key)?;
        if self.isolation.is_eager() {
            self.engine.apply_op(WalOp::Delete, key, None)?;
        }
        self.ops.push(TxnOp {
            kind: TxnOpKind::Delete,
            key: key.to_vec(),
            value: None,
            old_value,
        });
        Ok(())
    }

    /// Records (or immediately applies) a modify. Unlike [`set`], fails
    /// with [`TxnError::NotFound`] when the key is absent at record time.
    ///
    /// [`set`]: Self::set
    pub fn modify(&mut self, key: &[u8], value: &[u8]) -> Result<(), TxnError> {
        self.ensure_active()?;
        let old_value = self.engine.get(key)?;
        if old_value.is_none() {
            return Err(TxnError::NotFound);
        }
        if self.isolation.is_eager() {
            self.engine.apply_op(WalOp::Modify, key, Some(value))?;
        }
        self.ops.push(TxnOp {
            kind: TxnOpKind::Modify,
            key: key.to_vec(),
            value: Some(value.to_vec()),
            old_value,
        });
        Ok(())
    }

    /// Transactional read.
    ///
    /// `RepeatableRead` and `Serializable` scan the transaction's own op
    /// list newest-first and return the most recent override (value or
    /// tombstone); unmodified keys fall through to the backend. The other
    /// levels read the backend directly.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, TxnError> {
        self.ensure_active()?;
        if self.isolation.reads_own_writes() {
            for op in self.ops.iter().rev() {
                if op.key == key {
                    return Ok(match op.kind {
                        TxnOpKind::Set | TxnOpKind::Modify => op.value.clone(),
                        TxnOpKind::Delete => None,
                    });
                }
            }
        }
        Ok(self.engine.get(key)?)
    }

    // --------------------------------------------------------------------------------------------
    // Commit / rollback
    // --------------------------------------------------------------------------------------------

    /// Commits the transaction.
    ///
    /// Deferred ops are applied in record order under the engine's
    /// transaction gate. On a mid-commit failure the already-applied ops
    /// are undone in reverse order and the transaction aborts (see the
    /// module docs for the policy).
    pub fn commit(&mut self) -> Result<(), TxnError> {
        self.ensure_active()?;

        if !self.isolation.is_eager() {
            // Serializable already holds the gate exclusively; everyone
            // else takes it shared for the apply span.
            let _shared_gate = if self.gate.is_none() {
                Some(self.engine.txn_gate().read_arc())
            } else {
                None
            };

            for index in 0..self.ops.len() {
                let op = &self.ops[index];
                let result =
                    self.engine
                        .apply_op(op.kind.wal_op(), &op.key, op.value.as_deref());
                if let Err(source) = result {
                    warn!(
                        id = self.id,
                        index,
                        error = %source,
                        "commit failed; rolling applied ops back"
                    );
                    Self::undo_ops(&self.engine, &self.ops[..index]);
                    self.finish(TxnStatus::Aborted);
                    return Err(TxnError::CommitAborted { index, source });
                }
            }
        }

        self.finish(TxnStatus::Committed);
        info!(id = self.id, ops = self.ops.len(), "transaction committed");
        Ok(())
    }

    /// Rolls the transaction back.
    ///
    /// Eager (`ReadUncommitted`) transactions undo their ops in reverse
    /// order using the captured old values; deferred transactions simply
    /// discard the op list.
    pub fn rollback(&mut self) -> Result<(), TxnError> {
        self.ensure_active()?;
        if self.isolation.is_eager() {
            let _shared_gate = self.engine.txn_gate().read_arc();
            Self::undo_ops(&self.engine, &self.ops);
        }
        self.finish(TxnStatus::Aborted);
        debug!(id = self.id, "transaction rolled back");
        Ok(())
    }

    /// Best-effort reverse-order undo through the captured old values.
    /// Undo failures are logged and skipped; state restoration continues
    /// for the remaining ops.
    fn undo_ops(engine: &Engine, ops: &[TxnOp]) {
        for op in ops.iter().rev() {
            let result = match (&op.kind, &op.old_value) {
                // The key existed before: restore the captured value.
                (_, Some(old)) => engine.apply_op(WalOp::Set, &op.key, Some(old)),
                // Set created the key: remove it again.
                (TxnOpKind::Set, None) => match engine.apply_op(WalOp::Delete, &op.key, None) {
                    Err(EngineError::Backend(crate::backend::BackendError::NotFound)) => Ok(()),
                    other => other,
                },
                // Delete/modify of an absent key never applied; nothing
                // to undo.
                (TxnOpKind::Delete | TxnOpKind::Modify, None) => Ok(()),
            };
            if let Err(e) = result {
                error!(error = %e, "undo failed; continuing with remaining ops");
            }
        }
    }

    /// Transitions to a terminal status, stamps `end_time`, releases the
    /// serializable gate, and decrements the manager's active count.
    fn finish(&mut self, status: TxnStatus) {
        self.status = status;
        self.end_time = Some(SystemTime::now());
        self.gate = None;
        self.shared.active.fetch_sub(1, Ordering::Relaxed);
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.status == TxnStatus::Active {
            warn!(id = self.id, "transaction dropped while active; rolling back");
            if self.isolation.is_eager() {
                let _shared_gate = self.engine.txn_gate().read_arc();
                Self::undo_ops(&self.engine, &self.ops);
            }
            self.finish(TxnStatus::Aborted);
        }
    }
}
