//! # Shared Value Objects
//!
//! Plain data types exchanged between the engine, its backends, the
//! persistence layer, and the transaction layer:
//!
//! - [`KvPair`] — an owned key/value pair.
//! - [`KvRecord`] — a key with optional value, sequence number, and
//!   tombstone flag; the unit of batch operations.
//! - [`Batch`] — an ordered, capacity-bounded collection of records.
//! - [`KeyRange`] — a `[start, end]` byte range with independent
//!   inclusivity flags and an optional result limit.
//!
//! Keys and values are arbitrary byte sequences with explicit lengths.
//! Nothing in this crate assumes NUL-terminated text.
//!
//! The module also hosts [`shard_hash`], the byte-mixing hash shared by
//! the hash backend's bucket selection and exposed for cluster-level
//! shard-key routing.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Returned by [`Batch::push`] when the batch already holds `capacity` records.
#[derive(Debug, Error)]
#[error("batch is full (capacity {capacity})")]
pub struct BatchFull {
    /// The configured record capacity of the batch.
    pub capacity: usize,
}

// ------------------------------------------------------------------------------------------------
// KvPair / KvRecord
// ------------------------------------------------------------------------------------------------

/// An owned key/value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    /// Raw key bytes.
    pub key: Vec<u8>,
    /// Raw value bytes.
    pub value: Vec<u8>,
}

impl KvPair {
    /// Creates a pair from anything convertible to owned byte vectors.
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Total payload size of this pair in bytes.
    pub fn payload_len(&self) -> usize {
        self.key.len() + self.value.len()
    }
}

/// A logical KV record: key, optional value, sequence number, tombstone flag.
///
/// `value == None` after a `batch_get` marks the key as not found. The
/// `deleted` flag is meaningful to log-structured consumers; in-memory
/// backends drop deleted entries outright instead of keeping tombstones.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KvRecord {
    /// Raw key bytes.
    pub key: Vec<u8>,
    /// Value bytes; `None` marks absence (not-found result or delete request).
    pub value: Option<Vec<u8>>,
    /// Sequence number assigned by the WAL, or 0 when not yet logged.
    pub seq: u64,
    /// Tombstone marker for log-structured consumers.
    pub deleted: bool,
}

impl KvRecord {
    /// A record carrying a value, as used by `batch_set`.
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
            seq: 0,
            deleted: false,
        }
    }

    /// A key-only record, as used by `batch_get` and `batch_delete`.
    pub fn key_only(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: None,
            seq: 0,
            deleted: false,
        }
    }

    /// A tombstone record requesting deletion of `key`.
    pub fn tombstone(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: None,
            seq: 0,
            deleted: true,
        }
    }

    /// Whether the record currently carries a value.
    pub fn found(&self) -> bool {
        self.value.is_some()
    }
}

// ------------------------------------------------------------------------------------------------
// Batch
// ------------------------------------------------------------------------------------------------

/// An ordered sequence of [`KvRecord`]s with a fixed record capacity.
///
/// A batch operation is atomic per record, not across the batch; wrap the
/// batch in a transaction for all-or-nothing semantics.
#[derive(Debug, Clone)]
pub struct Batch {
    records: Vec<KvRecord>,
    capacity: usize,
}

impl Batch {
    /// Creates an empty batch that accepts up to `capacity` records.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Builds a batch directly from a record list; capacity equals its length.
    pub fn from_records(records: Vec<KvRecord>) -> Self {
        let capacity = records.len();
        Self { records, capacity }
    }

    /// Appends a record, failing with [`BatchFull`] once `capacity` is reached.
    pub fn push(&mut self, record: KvRecord) -> Result<(), BatchFull> {
        if self.records.len() >= self.capacity {
            return Err(BatchFull {
                capacity: self.capacity,
            });
        }
        self.records.push(record);
        Ok(())
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the batch holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The configured record capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Read access to the record list.
    pub fn records(&self) -> &[KvRecord] {
        &self.records
    }

    /// Mutable access to the record list, for in-place fill by `batch_get`.
    pub fn records_mut(&mut self) -> &mut [KvRecord] {
        &mut self.records
    }

    /// Consumes the batch, yielding its records.
    pub fn into_records(self) -> Vec<KvRecord> {
        self.records
    }

    /// Iterates over the records in order.
    pub fn iter(&self) -> std::slice::Iter<'_, KvRecord> {
        self.records.iter()
    }
}

// ------------------------------------------------------------------------------------------------
// KeyRange
// ------------------------------------------------------------------------------------------------

/// A `[start, end]` key range with independent inclusivity flags and an
/// optional result limit. Ordering is lexicographic over raw key bytes.
/// `None` bounds are unbounded on that side.
#[derive(Debug, Clone, Default)]
pub struct KeyRange {
    /// Lower bound, or `None` for unbounded.
    pub start: Option<Vec<u8>>,
    /// Upper bound, or `None` for unbounded.
    pub end: Option<Vec<u8>>,
    /// Whether `start` itself is part of the range.
    pub include_start: bool,
    /// Whether `end` itself is part of the range.
    pub include_end: bool,
    /// Maximum number of results, or `None` for all.
    pub limit: Option<usize>,
}

impl KeyRange {
    /// The unbounded range covering every key.
    pub fn all() -> Self {
        Self {
            start: None,
            end: None,
            include_start: true,
            include_end: true,
            limit: None,
        }
    }

    /// A doubly-inclusive `[start, end]` range.
    pub fn inclusive(start: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>) -> Self {
        Self {
            start: Some(start.into()),
            end: Some(end.into()),
            include_start: true,
            include_end: true,
            limit: None,
        }
    }

    /// Caps the number of results.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `key` falls inside the range (ignoring `limit`).
    pub fn contains(&self, key: &[u8]) -> bool {
        if let Some(start) = &self.start {
            match key.cmp(start.as_slice()) {
                std::cmp::Ordering::Less => return false,
                std::cmp::Ordering::Equal if !self.include_start => return false,
                _ => {}
            }
        }
        if let Some(end) = &self.end {
            match key.cmp(end.as_slice()) {
                std::cmp::Ordering::Greater => return false,
                std::cmp::Ordering::Equal if !self.include_end => return false,
                _ => {}
            }
        }
        true
    }
}

// ------------------------------------------------------------------------------------------------
// Shard-key hashing
// ------------------------------------------------------------------------------------------------

/// FNV-1a byte-mixing hash over a raw key.
///
/// Used by the hash backend for bucket selection and exposed for the
/// cluster layer's shard-key routing. Stable across processes and
/// platforms — do not change the constants.
pub fn shard_hash(key: &[u8]) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x100_0000_01b3;

    let mut hash = FNV_OFFSET;
    for &byte in key {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
