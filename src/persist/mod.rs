//! # Persistence Façade
//!
//! Binds the write-ahead log and the snapshot manager under one data
//! directory and one lifecycle:
//!
//! ```text
//! <data_dir>/wal/       wal-<seq>.log segments
//! <data_dir>/snapshot/  snapshot-<seq>.data dumps
//! ```
//!
//! Both sub-directories are created on open. Recovery composes the two
//! subsystems: load the snapshot with the highest sequence (if any), then
//! replay every WAL record whose sequence exceeds it, in order.
//!
//! The module also hosts [`MaintenanceHandle`], the cooperative
//! background task used for incremental WAL syncing and the compaction
//! trigger: a plain OS thread woken through a `crossbeam` stop channel,
//! terminating on the next tick after a stop signal and joined on engine
//! close.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{self, Sender};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::snapshot::{SnapshotError, SnapshotInfo, SnapshotManager};
use crate::types::KvPair;
use crate::wal::{ReplayStats, Wal, WalError, WalOp, WalOptions, WalRecord};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// WAL sub-directory name under the data directory.
pub const WAL_DIR: &str = "wal";

/// Snapshot sub-directory name under the data directory.
pub const SNAPSHOT_DIR: &str = "snapshot";

/// Snapshots retained after each new dump.
pub const SNAPSHOT_RETAIN: usize = 3;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors surfaced by the persistence façade.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PersistError {
    /// Error originating in the write-ahead log.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Error originating in the snapshot subsystem.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

// ------------------------------------------------------------------------------------------------
// Recovery report
// ------------------------------------------------------------------------------------------------

/// Outcome of one recovery pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryReport {
    /// Sequence of the snapshot that seeded the state, if one existed.
    pub snapshot_seq: Option<u64>,
    /// WAL replay statistics on top of the snapshot.
    pub replay: ReplayStats,
}

// ------------------------------------------------------------------------------------------------
// Persistence façade
// ------------------------------------------------------------------------------------------------

/// The WAL + snapshot pair rooted at one data directory.
#[derive(Debug)]
pub struct Persistence {
    data_dir: PathBuf,
    wal: Arc<Wal>,
    snapshots: SnapshotManager,
}

impl Persistence {
    /// Opens (or creates) `<data_dir>/wal/` and `<data_dir>/snapshot/`.
    pub fn open(data_dir: impl AsRef<Path>, wal_opts: WalOptions) -> Result<Self, PersistError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;

        let wal = Arc::new(Wal::open(data_dir.join(WAL_DIR), wal_opts)?);
        let snapshots = SnapshotManager::open(data_dir.join(SNAPSHOT_DIR))?;

        info!(data_dir = %data_dir.display(), "persistence opened");
        Ok(Self {
            data_dir,
            wal,
            snapshots,
        })
    }

    /// The data directory this façade owns.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// The write-ahead log.
    pub fn wal(&self) -> &Arc<Wal> {
        &self.wal
    }

    /// The snapshot manager.
    pub fn snapshots(&self) -> &SnapshotManager {
        &self.snapshots
    }

    /// Recovers durable state through one apply callback.
    ///
    /// The latest snapshot's entries (if any) are lowered to synthetic
    /// `Set` records stamped with the snapshot's sequence; every WAL
    /// record with a sequence beyond the snapshot follows, in order.
    pub fn recover<F>(&self, mut apply: F) -> Result<RecoveryReport, PersistError>
    where
        F: FnMut(&WalRecord) -> Result<(), WalError>,
    {
        let snapshot_seq = match self.snapshots.load_latest()? {
            Some((seq, entries)) => {
                debug!(seq, entries = entries.len(), "seeding state from snapshot");
                for pair in entries {
                    apply(&WalRecord {
                        seq,
                        op: WalOp::Set,
                        key: pair.key,
                        value: Some(pair.value),
                    })?;
                }
                Some(seq)
            }
            None => None,
        };

        let replay = self.wal.replay(snapshot_seq.unwrap_or(0), &mut apply)?;
        Ok(RecoveryReport {
            snapshot_seq,
            replay,
        })
    }

    /// Dumps `entries` as a snapshot covering the WAL's current sequence,
    /// then prunes old snapshots down to [`SNAPSHOT_RETAIN`].
    pub fn create_snapshot(&self, entries: &[KvPair]) -> Result<SnapshotInfo, PersistError> {
        let seq = self.wal.current_seq();
        let info = self.snapshots.create(seq, entries)?;
        if let Err(e) = self.snapshots.prune(SNAPSHOT_RETAIN) {
            warn!(error = %e, "snapshot pruning failed");
        }
        Ok(info)
    }
}

// ------------------------------------------------------------------------------------------------
// Background maintenance
// ------------------------------------------------------------------------------------------------

/// A cooperative background task on a plain OS thread.
///
/// The thread sleeps on a `crossbeam` stop channel with a timeout of one
/// `interval`; each timeout runs `tick`. A stop signal (or the handle
/// being dropped) ends the loop on the next wakeup, and `tick` returning
/// `false` ends it early (the engine it served is gone). [`stop`] joins
/// the thread.
///
/// [`stop`]: MaintenanceHandle::stop
#[derive(Debug)]
pub struct MaintenanceHandle {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MaintenanceHandle {
    /// Spawns the maintenance thread.
    pub fn start<F>(name: &str, interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(channel::RecvTimeoutError::Timeout) => {
                            if !tick() {
                                debug!("maintenance target gone; thread exiting");
                                break;
                            }
                        }
                        Ok(()) | Err(channel::RecvTimeoutError::Disconnected) => break,
                    }
                }
            });

        match thread {
            Ok(handle) => Self {
                stop_tx: Some(stop_tx),
                thread: Some(handle),
            },
            Err(e) => {
                error!(error = %e, "failed to spawn maintenance thread");
                Self {
                    stop_tx: None,
                    thread: None,
                }
            }
        }
    }

    /// Signals the thread to stop and joins it.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.thread.take() {
            // A tick can end up holding the last reference to the state
            // that owns this handle, in which case the drop runs on the
            // maintenance thread itself. Joining would self-deadlock;
            // the loop is already unwinding, so there is nothing to wait
            // for.
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                error!("maintenance thread panicked");
            }
        }
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
