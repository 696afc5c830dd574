//! # Write-Ahead Log
//!
//! A durable, append-only, sequenced record log underneath the storage
//! engine. Every mutation is appended here **before** it is applied to
//! the in-memory backend; on restart the log is replayed through a
//! caller-supplied apply callback to reconstruct the last durable state.
//!
//! ## On-disk layout
//!
//! A log directory holds one or more segments named `wal-<seq>.log`,
//! where `<seq>` is the sequence number of the segment's first record.
//! Segments are append-only; the active segment rolls over once it
//! exceeds [`WalOptions::rollover_size`]. Each record is tightly packed,
//! little-endian:
//!
//! ```text
//! u64 seq │ u8 op │ u32 key_len │ key_bytes │ u32 value_len │ value_bytes?
//! ```
//!
//! `value_bytes` is present iff `value_len > 0`. Lengths are raw byte
//! counts — no text assumptions, no trailing NUL. The v1 format carries
//! no per-record checksum: a torn tail is detected by a short read on any
//! field, but mid-field corruption that still parses cannot be told apart
//! from a valid record (a CRC-per-record v2 format would close this).
//!
//! ## Concurrency
//!
//! One mutex covers append, fsync, and the `next_seq` advance. The engine
//! acquires its own write lock before calling in, so the nesting order is
//! always engine lock → WAL mutex, never the reverse.
//!
//! ## Guarantees
//!
//! - `seq` is strictly increasing across all records of one log directory.
//! - A failed append truncates any partial bytes back off the segment and
//!   leaves `next_seq` unchanged.
//! - Replay stops cleanly at a truncated tail and reports
//!   `next_seq = max(seen) + 1`; the torn tail of the last segment is
//!   truncated away so new appends never follow garbage.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::ffi::OsStr;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::types::KvPair;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Active segment size at which the log rolls over to a new file.
pub const WAL_ROLLOVER_SIZE: u64 = 64 * 1024 * 1024;

/// Default period of the incremental background fsync.
pub const WAL_SYNC_INTERVAL_SECS: u64 = 5;

/// Unsynced-append count that forces an inline fsync even between
/// incremental sync ticks.
pub const WAL_SYNC_BATCH: u64 = 1024;

/// Record count (since the last compaction) beyond which the log is
/// eligible for compaction regardless of its live-data ratio.
pub const WAL_COMPACT_THRESHOLD: u64 = 100_000;

/// Live-data ratio (live keys / logged records) below which the log is
/// eligible for compaction.
pub const WAL_COMPACT_RATIO: f64 = 0.5;

/// Minimum logged records before the ratio trigger is considered.
pub const WAL_COMPACT_MIN_RECORDS: u64 = 1024;

/// Upper bound on a single key or value accepted into the log; lengths
/// beyond this read back from disk are treated as torn-write garbage.
pub const WAL_MAX_RECORD_BYTES: usize = 256 * 1024 * 1024;

const U32_SIZE: usize = std::mem::size_of::<u32>();

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by WAL operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WalError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The log contains a record that parses but violates an invariant
    /// (sequence regression, segment-name mismatch).
    #[error("corrupt log at {path}: {reason}")]
    Corrupt {
        /// Segment in which the violation was detected.
        path: PathBuf,
        /// What was violated.
        reason: String,
    },

    /// Key or value exceeds [`WAL_MAX_RECORD_BYTES`].
    #[error("record exceeds maximum size ({0} bytes)")]
    RecordTooLarge(usize),

    /// Internal consistency or locking error.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Record model
// ------------------------------------------------------------------------------------------------

/// Operation tag of a WAL record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WalOp {
    /// Insert or replace a key.
    Set = 1,
    /// Remove a key.
    Delete = 2,
    /// Replace the value of an existing key.
    Modify = 3,
}

impl WalOp {
    fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Set),
            2 => Some(Self::Delete),
            3 => Some(Self::Modify),
            _ => None,
        }
    }
}

/// One decoded log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    /// Globally increasing sequence number.
    pub seq: u64,
    /// Operation tag.
    pub op: WalOp,
    /// Raw key bytes.
    pub key: Vec<u8>,
    /// Value bytes; absent for deletes and zero-length values.
    pub value: Option<Vec<u8>>,
}

impl WalRecord {
    /// Encoded size of a record with the given payload lengths.
    fn encoded_len(key_len: usize, value_len: usize) -> usize {
        8 + 1 + U32_SIZE + key_len + U32_SIZE + value_len
    }
}

fn encode_record(buf: &mut Vec<u8>, seq: u64, op: WalOp, key: &[u8], value: Option<&[u8]>) {
    buf.extend_from_slice(&seq.to_le_bytes());
    buf.push(op as u8);
    buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
    buf.extend_from_slice(key);
    let value = value.unwrap_or(&[]);
    buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buf.extend_from_slice(value);
}

// ------------------------------------------------------------------------------------------------
// Record reading
// ------------------------------------------------------------------------------------------------

enum Fill {
    Full,
    Empty,
    Partial,
}

/// Reads exactly `buf.len()` bytes, distinguishing clean EOF (no bytes)
/// from a torn tail (some bytes).
fn fill_buf<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<Fill> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Ok(if filled == 0 { Fill::Empty } else { Fill::Partial });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(Fill::Full)
}

enum ReadOutcome {
    Record(WalRecord),
    /// Clean end of segment.
    Eof,
    /// Short read or garbage at a record boundary: the defined result of
    /// a crash mid-append. Replay of this segment stops here.
    Torn(&'static str),
}

fn read_record<R: Read>(reader: &mut R) -> Result<ReadOutcome, WalError> {
    let mut seq_buf = [0u8; 8];
    match fill_buf(reader, &mut seq_buf)? {
        Fill::Full => {}
        Fill::Empty => return Ok(ReadOutcome::Eof),
        Fill::Partial => return Ok(ReadOutcome::Torn("sequence field")),
    }
    let seq = u64::from_le_bytes(seq_buf);

    let mut op_buf = [0u8; 1];
    match fill_buf(reader, &mut op_buf)? {
        Fill::Full => {}
        _ => return Ok(ReadOutcome::Torn("op field")),
    }
    let Some(op) = WalOp::from_u8(op_buf[0]) else {
        return Ok(ReadOutcome::Torn("unknown op tag"));
    };

    let mut len_buf = [0u8; U32_SIZE];
    match fill_buf(reader, &mut len_buf)? {
        Fill::Full => {}
        _ => return Ok(ReadOutcome::Torn("key length")),
    }
    let key_len = u32::from_le_bytes(len_buf) as usize;
    if key_len > WAL_MAX_RECORD_BYTES {
        return Ok(ReadOutcome::Torn("implausible key length"));
    }

    let mut key = vec![0u8; key_len];
    match fill_buf(reader, &mut key)? {
        Fill::Full => {}
        _ => return Ok(ReadOutcome::Torn("key bytes")),
    }

    match fill_buf(reader, &mut len_buf)? {
        Fill::Full => {}
        _ => return Ok(ReadOutcome::Torn("value length")),
    }
    let value_len = u32::from_le_bytes(len_buf) as usize;
    if value_len > WAL_MAX_RECORD_BYTES {
        return Ok(ReadOutcome::Torn("implausible value length"));
    }

    let value = if value_len > 0 {
        let mut value = vec![0u8; value_len];
        match fill_buf(reader, &mut value)? {
            Fill::Full => {}
            _ => return Ok(ReadOutcome::Torn("value bytes")),
        }
        Some(value)
    } else {
        None
    };

    Ok(ReadOutcome::Record(WalRecord { seq, op, key, value }))
}

// ------------------------------------------------------------------------------------------------
// Segment index
// ------------------------------------------------------------------------------------------------

/// One entry of the segment index.
#[derive(Debug, Clone)]
pub struct WalFileInfo {
    /// Segment path.
    pub path: PathBuf,
    /// Sequence of the segment's first record (encoded in its name).
    pub start_seq: u64,
    /// Sequence of the segment's last valid record; `start_seq - 1` when
    /// the segment holds no records yet.
    pub end_seq: u64,
    /// Valid bytes in the segment.
    pub size: u64,
}

fn segment_path(dir: &Path, start_seq: u64) -> PathBuf {
    dir.join(format!("wal-{start_seq:06}.log"))
}

fn parse_segment_name(path: &Path) -> Option<u64> {
    let name = path.file_name().and_then(OsStr::to_str)?;
    name.strip_prefix("wal-")?
        .strip_suffix(".log")?
        .parse::<u64>()
        .ok()
}

/// Result of scanning one segment at open time.
struct SegmentScan {
    records: u64,
    first_seq: Option<u64>,
    last_seq: u64,
    valid_len: u64,
    file_len: u64,
}

fn scan_segment(path: &Path) -> Result<SegmentScan, WalError> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let mut scan = SegmentScan {
        records: 0,
        first_seq: None,
        last_seq: 0,
        valid_len: 0,
        file_len,
    };
    loop {
        match read_record(&mut reader)? {
            ReadOutcome::Eof => break,
            ReadOutcome::Torn(reason) => {
                warn!(path = %path.display(), reason, "torn record tail in segment");
                break;
            }
            ReadOutcome::Record(record) => {
                if scan.records > 0 && record.seq <= scan.last_seq {
                    return Err(WalError::Corrupt {
                        path: path.to_path_buf(),
                        reason: format!(
                            "sequence regression ({} after {})",
                            record.seq, scan.last_seq
                        ),
                    });
                }
                scan.first_seq.get_or_insert(record.seq);
                scan.last_seq = record.seq;
                scan.records += 1;
                scan.valid_len += WalRecord::encoded_len(
                    record.key.len(),
                    record.value.as_ref().map_or(0, Vec::len),
                ) as u64;
            }
        }
    }
    Ok(scan)
}

// ------------------------------------------------------------------------------------------------
// Options
// ------------------------------------------------------------------------------------------------

/// Tunables of the write-ahead log.
#[derive(Debug, Clone)]
pub struct WalOptions {
    /// Fsync after every append.
    pub sync_write: bool,
    /// Segment size at which the log rolls over.
    pub rollover_size: u64,
    /// Unsynced-append bound that forces an inline fsync.
    pub sync_batch: u64,
    /// Record-count compaction trigger.
    pub compact_threshold: u64,
    /// Live-ratio compaction trigger.
    pub compact_ratio: f64,
}

impl Default for WalOptions {
    fn default() -> Self {
        Self {
            sync_write: false,
            rollover_size: WAL_ROLLOVER_SIZE,
            sync_batch: WAL_SYNC_BATCH,
            compact_threshold: WAL_COMPACT_THRESHOLD,
            compact_ratio: WAL_COMPACT_RATIO,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Replay statistics
// ------------------------------------------------------------------------------------------------

/// Summary of one [`Wal::replay`] pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayStats {
    /// Records handed to the apply callback.
    pub applied: u64,
    /// Records skipped because their sequence was covered by a snapshot.
    pub skipped: u64,
    /// Highest sequence seen, or 0 when the log was empty.
    pub max_seq: u64,
}

// ------------------------------------------------------------------------------------------------
// WAL core
// ------------------------------------------------------------------------------------------------

struct WalInner {
    file: File,
    cur: WalFileInfo,
    sealed: Vec<WalFileInfo>,
    next_seq: u64,
    last_sync_seq: u64,
    records_since_compact: u64,
}

/// The write-ahead log over one log directory.
///
/// See the [module-level documentation](self) for format, concurrency,
/// and guarantees.
pub struct Wal {
    dir: PathBuf,
    opts: WalOptions,
    inner: Mutex<WalInner>,
}

impl std::fmt::Debug for Wal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wal")
            .field("dir", &self.dir)
            .field("opts", &self.opts)
            .finish_non_exhaustive()
    }
}

impl Wal {
    /// Opens (or creates) the log rooted at `dir`.
    ///
    /// Existing segments are scanned to rebuild the file index and
    /// establish `next_seq = max(seen) + 1`. A torn tail on the last
    /// segment is truncated away.
    pub fn open(dir: impl AsRef<Path>, opts: WalOptions) -> Result<Self, WalError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut segment_paths: Vec<(u64, PathBuf)> = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if let Some(start_seq) = parse_segment_name(&path) {
                segment_paths.push((start_seq, path));
            }
        }
        segment_paths.sort_by_key(|(seq, _)| *seq);

        let mut sealed = Vec::new();
        let mut next_seq = 1u64;
        let mut records_total = 0u64;
        let last_idx = segment_paths.len().saturating_sub(1);
        for (idx, (start_seq, path)) in segment_paths.iter().enumerate() {
            let scan = scan_segment(path)?;
            if let Some(first) = scan.first_seq {
                if first != *start_seq {
                    return Err(WalError::Corrupt {
                        path: path.clone(),
                        reason: format!(
                            "segment name encodes {start_seq} but first record is {first}"
                        ),
                    });
                }
                if first < next_seq {
                    return Err(WalError::Corrupt {
                        path: path.clone(),
                        reason: format!("segment overlaps predecessor ({first} < {next_seq})"),
                    });
                }
            }

            if scan.valid_len < scan.file_len {
                if idx == last_idx {
                    warn!(
                        path = %path.display(),
                        valid = scan.valid_len,
                        total = scan.file_len,
                        "truncating torn tail off last segment"
                    );
                    let f = OpenOptions::new().write(true).open(path)?;
                    f.set_len(scan.valid_len)?;
                    f.sync_data()?;
                } else {
                    warn!(
                        path = %path.display(),
                        "sealed segment carries trailing garbage; records past it are lost"
                    );
                }
            }

            let end_seq = if scan.records > 0 {
                scan.last_seq
            } else {
                start_seq.saturating_sub(1)
            };
            next_seq = next_seq.max(end_seq + 1).max(*start_seq);
            records_total += scan.records;
            sealed.push(WalFileInfo {
                path: path.clone(),
                start_seq: *start_seq,
                end_seq,
                size: scan.valid_len,
            });
        }

        // The last on-disk segment stays current unless it already hit
        // the rollover size.
        let reuse_last = sealed
            .last()
            .is_some_and(|info| info.size < opts.rollover_size);
        let cur = if reuse_last {
            match sealed.pop() {
                Some(info) => info,
                None => unreachable!("reuse_last implies a sealed segment"),
            }
        } else {
            WalFileInfo {
                path: segment_path(&dir, next_seq),
                start_seq: next_seq,
                end_seq: next_seq - 1,
                size: 0,
            }
        };
        let file = OpenOptions::new().create(true).append(true).open(&cur.path)?;

        info!(
            dir = %dir.display(),
            segments = sealed.len() + 1,
            next_seq,
            "WAL opened"
        );

        Ok(Self {
            dir,
            opts,
            inner: Mutex::new(WalInner {
                file,
                cur,
                sealed,
                next_seq,
                last_sync_seq: next_seq - 1,
                records_since_compact: records_total,
            }),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, WalInner>, WalError> {
        self.inner
            .lock()
            .map_err(|_| WalError::Internal("WAL mutex poisoned".into()))
    }

    /// Appends one record and returns its sequence number.
    ///
    /// The sequence is taken from `next_seq` under the WAL mutex and the
    /// counter only advances once the bytes are on the file (and fsynced,
    /// when `sync_write` or the batch bound requires it). A failed write
    /// or failed inline fsync truncates the record back off the segment
    /// and leaves `next_seq` unchanged.
    pub fn append(&self, op: WalOp, key: &[u8], value: Option<&[u8]>) -> Result<u64, WalError> {
        if key.len() > WAL_MAX_RECORD_BYTES {
            return Err(WalError::RecordTooLarge(key.len()));
        }
        if let Some(value) = value {
            if value.len() > WAL_MAX_RECORD_BYTES {
                return Err(WalError::RecordTooLarge(value.len()));
            }
        }

        let mut inner = self.lock()?;
        let seq = inner.next_seq;

        let mut buf =
            Vec::with_capacity(WalRecord::encoded_len(key.len(), value.map_or(0, <[u8]>::len)));
        encode_record(&mut buf, seq, op, key, value);

        let pre_len = inner.cur.size;
        if let Err(e) = inner.file.write_all(&buf) {
            let _ = inner.file.set_len(pre_len);
            return Err(e.into());
        }

        // Inline fsync: every append under `sync_write`, otherwise once
        // the unsynced batch bound is hit. Runs before the counters
        // advance so a failed sync rolls the record back and the append
        // has no visible effect.
        let must_sync = self.opts.sync_write
            || seq.saturating_sub(inner.last_sync_seq) >= self.opts.sync_batch;
        if must_sync {
            if let Err(e) = inner.file.sync_data() {
                let _ = inner.file.set_len(pre_len);
                return Err(e.into());
            }
            inner.last_sync_seq = seq;
        }

        inner.next_seq = seq + 1;
        inner.cur.size += buf.len() as u64;
        inner.cur.end_seq = seq;
        inner.records_since_compact += 1;

        if inner.cur.size >= self.opts.rollover_size {
            self.roll(&mut inner)?;
        }

        trace!(seq, op = ?op, key_len = key.len(), "WAL record appended");
        Ok(seq)
    }

    /// Seals the current segment and opens a fresh one named after the
    /// next sequence number.
    fn roll(&self, inner: &mut WalInner) -> Result<(), WalError> {
        inner.file.sync_data()?;

        let next_start = inner.next_seq;
        let path = segment_path(&self.dir, next_start);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let fresh = WalFileInfo {
            path,
            start_seq: next_start,
            end_seq: next_start - 1,
            size: 0,
        };
        let old = std::mem::replace(&mut inner.cur, fresh);
        info!(
            sealed = %old.path.display(),
            last_seq = old.end_seq,
            "WAL segment rolled over"
        );
        inner.sealed.push(old);
        inner.file = file;
        inner.last_sync_seq = next_start - 1;
        Ok(())
    }

    /// Replays every record with `seq > from_seq` in order through
    /// `apply`.
    ///
    /// A torn tail terminates replay of that segment cleanly; a sequence
    /// regression or segment-name mismatch is reported as
    /// [`WalError::Corrupt`].
    pub fn replay<F>(&self, from_seq: u64, mut apply: F) -> Result<ReplayStats, WalError>
    where
        F: FnMut(&WalRecord) -> Result<(), WalError>,
    {
        let inner = self.lock()?;
        let mut segments: Vec<WalFileInfo> = inner.sealed.clone();
        segments.push(inner.cur.clone());

        let mut stats = ReplayStats::default();
        let mut last_seen = 0u64;
        for info in &segments {
            debug!(path = %info.path.display(), "replaying segment");
            let file = File::open(&info.path)?;
            let mut reader = BufReader::new(file);
            loop {
                match read_record(&mut reader)? {
                    ReadOutcome::Eof => break,
                    ReadOutcome::Torn(reason) => {
                        warn!(path = %info.path.display(), reason, "replay stopped at torn tail");
                        break;
                    }
                    ReadOutcome::Record(record) => {
                        if record.seq <= last_seen {
                            return Err(WalError::Corrupt {
                                path: info.path.clone(),
                                reason: format!(
                                    "sequence regression ({} after {last_seen})",
                                    record.seq
                                ),
                            });
                        }
                        last_seen = record.seq;
                        stats.max_seq = record.seq;
                        if record.seq > from_seq {
                            apply(&record)?;
                            stats.applied += 1;
                        } else {
                            stats.skipped += 1;
                        }
                    }
                }
            }
        }

        info!(
            applied = stats.applied,
            skipped = stats.skipped,
            max_seq = stats.max_seq,
            "WAL replay finished"
        );
        Ok(stats)
    }

    /// Rewrites the log as one fresh segment reproducing `live`, then
    /// unlinks every superseded segment. Returns the sequence of the
    /// first dumped record.
    ///
    /// The caller must quiesce appends for the duration (the engine holds
    /// its write lock); records appended concurrently would land in a
    /// segment this method deletes.
    pub fn compact(&self, live: &[KvPair]) -> Result<u64, WalError> {
        let mut inner = self.lock()?;

        // Start the dump on a fresh segment unless the current one is
        // still empty (rolling would reuse its name).
        if inner.cur.size > 0 {
            self.roll(&mut inner)?;
        }
        let dump_start = inner.next_seq;

        let mut buf = Vec::new();
        for pair in live {
            let seq = inner.next_seq;
            buf.clear();
            encode_record(&mut buf, seq, WalOp::Set, &pair.key, Some(&pair.value));
            inner.file.write_all(&buf)?;
            inner.next_seq = seq + 1;
            inner.cur.size += buf.len() as u64;
            inner.cur.end_seq = seq;
        }
        inner.file.sync_data()?;
        inner.last_sync_seq = inner.next_seq - 1;
        inner.records_since_compact = live.len() as u64;

        let removed = Self::remove_sealed_before(&mut inner, dump_start);
        info!(
            live = live.len(),
            removed_segments = removed,
            compact_seq = dump_start,
            "WAL compacted"
        );
        Ok(dump_start)
    }

    /// Unlinks sealed segments whose records all precede `before_seq`.
    pub fn cleanup_old_logs(&self, before_seq: u64) -> Result<usize, WalError> {
        let mut inner = self.lock()?;
        Ok(Self::remove_sealed_before(&mut inner, before_seq))
    }

    fn remove_sealed_before(inner: &mut WalInner, before_seq: u64) -> usize {
        let mut removed = 0;
        inner.sealed.retain(|info| {
            if info.end_seq < before_seq {
                match fs::remove_file(&info.path) {
                    Ok(()) => {
                        debug!(path = %info.path.display(), "removed superseded segment");
                        removed += 1;
                        false
                    }
                    Err(e) => {
                        warn!(path = %info.path.display(), error = %e, "failed to remove segment");
                        true
                    }
                }
            } else {
                true
            }
        });
        removed
    }

    /// Whether either compaction trigger has fired, given the number of
    /// currently live keys.
    pub fn needs_compaction(&self, live_count: usize) -> bool {
        let Ok(inner) = self.inner.lock() else {
            return false;
        };
        let records = inner.records_since_compact;
        if records > self.opts.compact_threshold {
            return true;
        }
        records >= WAL_COMPACT_MIN_RECORDS
            && (live_count as f64) < self.opts.compact_ratio * records as f64
    }

    /// Fsyncs appends made since the last sync. Returns how many records
    /// the sync covered.
    pub fn sync_incremental(&self) -> Result<u64, WalError> {
        let mut inner = self.lock()?;
        let appended = inner.next_seq - 1;
        if appended <= inner.last_sync_seq {
            return Ok(0);
        }
        let pending = appended - inner.last_sync_seq;
        inner.file.sync_data()?;
        inner.last_sync_seq = appended;
        trace!(records = pending, "incremental WAL sync");
        Ok(pending)
    }

    /// Full fsync of the active segment, data and metadata.
    pub fn sync(&self) -> Result<(), WalError> {
        let mut inner = self.lock()?;
        inner.file.sync_all()?;
        inner.last_sync_seq = inner.next_seq - 1;
        Ok(())
    }

    /// Sequence of the most recently appended record (0 when empty).
    pub fn current_seq(&self) -> u64 {
        self.inner
            .lock()
            .map(|inner| inner.next_seq - 1)
            .unwrap_or(0)
    }

    /// Sequence the next append will receive.
    pub fn next_seq(&self) -> u64 {
        self.inner.lock().map(|inner| inner.next_seq).unwrap_or(0)
    }

    /// Records appended since the last compaction (or open).
    pub fn records_since_compact(&self) -> u64 {
        self.inner
            .lock()
            .map(|inner| inner.records_since_compact)
            .unwrap_or(0)
    }

    /// Snapshot of the segment index, sealed segments first, the active
    /// segment last.
    pub fn segments(&self) -> Vec<WalFileInfo> {
        match self.inner.lock() {
            Ok(inner) => {
                let mut segments = inner.sealed.clone();
                segments.push(inner.cur.clone());
                segments
            }
            Err(_) => Vec::new(),
        }
    }

    /// The log directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        match self.inner.lock() {
            Ok(inner) => {
                if let Err(e) = inner.file.sync_data() {
                    error!(dir = %self.dir.display(), error = %e, "WAL sync failed on drop");
                }
            }
            Err(poisoned) => {
                let inner = poisoned.into_inner();
                if let Err(e) = inner.file.sync_data() {
                    error!(
                        dir = %self.dir.display(),
                        error = %e,
                        "WAL sync failed on drop (poisoned lock)"
                    );
                }
            }
        }
    }
}
