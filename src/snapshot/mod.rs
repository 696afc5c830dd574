//! # Snapshot Manager
//!
//! Periodic full-state dumps of an engine, one file per snapshot, named
//! `snapshot-<seq>.data` where `<seq>` is the WAL sequence the dump
//! covers. Recovery loads the file with the highest sequence and replays
//! only WAL records beyond it. The absence of any snapshot file is not an
//! error — recovery then replays the whole log.
//!
//! ## File format
//!
//! The manager treats snapshot content as opaque; this crate's engines
//! all use the same framing:
//!
//! ```text
//! magic "CKVS" │ u32 version │ u64 seq │ u64 count │
//!   count × (u32 key_len │ key │ u32 value_len │ value) │ u32 crc32
//! ```
//!
//! All integers little-endian. The trailing CRC32 covers every preceding
//! byte; a mismatch surfaces as [`SnapshotError::Corrupt`]. Files are
//! written to a temporary name and renamed into place so a crash mid-dump
//! never leaves a half-written snapshot under a valid name. Loads go
//! through a read-only memory map.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher as Crc32;
use memmap2::Mmap;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::types::KvPair;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Magic prefix of every snapshot file.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"CKVS";

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

const U32_SIZE: usize = std::mem::size_of::<u32>();
const U64_SIZE: usize = std::mem::size_of::<u64>();

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by snapshot operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SnapshotError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file failed structural or checksum validation.
    #[error("corrupt snapshot at {path}: {reason}")]
    Corrupt {
        /// Offending file.
        path: PathBuf,
        /// What failed to validate.
        reason: String,
    },
}

// ------------------------------------------------------------------------------------------------
// Snapshot descriptor
// ------------------------------------------------------------------------------------------------

/// A snapshot file on disk and the WAL sequence it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    /// File path.
    pub path: PathBuf,
    /// WAL sequence covered by the dump (parsed from the file name).
    pub seq: u64,
}

fn snapshot_file_name(seq: u64) -> String {
    format!("snapshot-{seq:06}.data")
}

fn parse_snapshot_name(path: &Path) -> Option<u64> {
    let name = path.file_name().and_then(OsStr::to_str)?;
    name.strip_prefix("snapshot-")?
        .strip_suffix(".data")?
        .parse::<u64>()
        .ok()
}

// ------------------------------------------------------------------------------------------------
// File encode / decode
// ------------------------------------------------------------------------------------------------

/// Writes a snapshot file at `path` covering WAL sequence `seq`.
///
/// The dump goes to `<path>.tmp` first and is renamed into place after a
/// final fsync.
pub fn write_snapshot_file(path: &Path, seq: u64, entries: &[KvPair]) -> Result<(), SnapshotError> {
    let mut body = Vec::new();
    body.extend_from_slice(&SNAPSHOT_MAGIC);
    body.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    body.extend_from_slice(&seq.to_le_bytes());
    body.extend_from_slice(&(entries.len() as u64).to_le_bytes());
    for pair in entries {
        body.extend_from_slice(&(pair.key.len() as u32).to_le_bytes());
        body.extend_from_slice(&pair.key);
        body.extend_from_slice(&(pair.value.len() as u32).to_le_bytes());
        body.extend_from_slice(&pair.value);
    }
    let mut hasher = Crc32::new();
    hasher.update(&body);
    let checksum = hasher.finalize();

    let tmp_path = path.with_extension("data.tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(&body)?;
        file.write_all(&checksum.to_le_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;

    debug!(path = %path.display(), seq, entries = entries.len(), "snapshot file written");
    Ok(())
}

/// Reads and validates a snapshot file, returning `(seq, entries)`.
pub fn read_snapshot_file(path: &Path) -> Result<(u64, Vec<KvPair>), SnapshotError> {
    let corrupt = |reason: &str| SnapshotError::Corrupt {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let file = File::open(path)?;
    // Safety note: the map is read-only and snapshot files are never
    // rewritten in place (tmp + rename), so the mapping stays stable.
    let map = unsafe { Mmap::map(&file)? };
    let bytes: &[u8] = &map;

    let min_len = SNAPSHOT_MAGIC.len() + U32_SIZE + 2 * U64_SIZE + U32_SIZE;
    if bytes.len() < min_len {
        return Err(corrupt("file shorter than fixed header"));
    }

    let (body, crc_bytes) = bytes.split_at(bytes.len() - U32_SIZE);
    let stored = u32::from_le_bytes(
        crc_bytes
            .try_into()
            .map_err(|_| corrupt("checksum field truncated"))?,
    );
    let mut hasher = Crc32::new();
    hasher.update(body);
    if hasher.finalize() != stored {
        return Err(corrupt("checksum mismatch"));
    }

    let mut cursor = 0usize;

    if take(body, &mut cursor, SNAPSHOT_MAGIC.len(), path)? != SNAPSHOT_MAGIC {
        return Err(corrupt("bad magic"));
    }
    let version = read_u32(body, &mut cursor, path)?;
    if version != SNAPSHOT_VERSION {
        return Err(corrupt(&format!("unsupported version {version}")));
    }
    let seq = read_u64(body, &mut cursor, path)?;
    let count = read_u64(body, &mut cursor, path)?;

    let mut entries = Vec::new();
    for _ in 0..count {
        let key_len = read_u32(body, &mut cursor, path)? as usize;
        let key = take(body, &mut cursor, key_len, path)?.to_vec();
        let value_len = read_u32(body, &mut cursor, path)? as usize;
        let value = take(body, &mut cursor, value_len, path)?.to_vec();
        entries.push(KvPair { key, value });
    }
    if cursor != body.len() {
        return Err(corrupt("trailing bytes after last entry"));
    }

    Ok((seq, entries))
}

fn take<'a>(
    body: &'a [u8],
    cursor: &mut usize,
    n: usize,
    path: &Path,
) -> Result<&'a [u8], SnapshotError> {
    let end = cursor
        .checked_add(n)
        .filter(|&end| end <= body.len())
        .ok_or_else(|| SnapshotError::Corrupt {
            path: path.to_path_buf(),
            reason: "payload overruns file".to_string(),
        })?;
    let slice = &body[*cursor..end];
    *cursor = end;
    Ok(slice)
}

fn read_u32(body: &[u8], cursor: &mut usize, path: &Path) -> Result<u32, SnapshotError> {
    let bytes = take(body, cursor, U32_SIZE, path)?;
    Ok(u32::from_le_bytes(bytes.try_into().unwrap_or_default()))
}

fn read_u64(body: &[u8], cursor: &mut usize, path: &Path) -> Result<u64, SnapshotError> {
    let bytes = take(body, cursor, U64_SIZE, path)?;
    Ok(u64::from_le_bytes(bytes.try_into().unwrap_or_default()))
}

// ------------------------------------------------------------------------------------------------
// Manager
// ------------------------------------------------------------------------------------------------

/// Manages the snapshot directory: creation, latest-by-sequence
/// selection, and retention pruning.
#[derive(Debug)]
pub struct SnapshotManager {
    dir: PathBuf,
}

impl SnapshotManager {
    /// Opens (or creates) the snapshot directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// The snapshot directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes a snapshot covering WAL sequence `seq`.
    pub fn create(&self, seq: u64, entries: &[KvPair]) -> Result<SnapshotInfo, SnapshotError> {
        let path = self.dir.join(snapshot_file_name(seq));
        write_snapshot_file(&path, seq, entries)?;
        info!(path = %path.display(), seq, entries = entries.len(), "snapshot created");
        Ok(SnapshotInfo { path, seq })
    }

    /// Lists every snapshot in the directory, ascending by sequence.
    pub fn list(&self) -> Result<Vec<SnapshotInfo>, SnapshotError> {
        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if let Some(seq) = parse_snapshot_name(&path) {
                snapshots.push(SnapshotInfo { path, seq });
            }
        }
        snapshots.sort_by_key(|info| info.seq);
        Ok(snapshots)
    }

    /// The snapshot with the highest sequence, or `None` when the
    /// directory holds no snapshot.
    pub fn latest(&self) -> Result<Option<SnapshotInfo>, SnapshotError> {
        Ok(self.list()?.pop())
    }

    /// Loads the latest snapshot, returning `(seq, entries)`; `None` when
    /// no snapshot exists.
    pub fn load_latest(&self) -> Result<Option<(u64, Vec<KvPair>)>, SnapshotError> {
        match self.latest()? {
            Some(info) => {
                let (seq, entries) = read_snapshot_file(&info.path)?;
                if seq != info.seq {
                    return Err(SnapshotError::Corrupt {
                        path: info.path,
                        reason: format!("name encodes seq {} but body says {seq}", info.seq),
                    });
                }
                debug!(seq, entries = entries.len(), "snapshot loaded");
                Ok(Some((seq, entries)))
            }
            None => Ok(None),
        }
    }

    /// Removes all but the `keep` newest snapshots. Returns how many
    /// files were unlinked.
    pub fn prune(&self, keep: usize) -> Result<usize, SnapshotError> {
        let snapshots = self.list()?;
        let excess = snapshots.len().saturating_sub(keep);
        let mut removed = 0;
        for info in snapshots.into_iter().take(excess) {
            match fs::remove_file(&info.path) {
                Ok(()) => removed += 1,
                Err(e) => {
                    warn!(path = %info.path.display(), error = %e, "failed to prune snapshot")
                }
            }
        }
        Ok(removed)
    }
}
