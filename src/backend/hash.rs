//! Hash backend with tree-promoted buckets.
//!
//! Open hashing over power-of-two bucket arrays. Each bucket is a tagged
//! sum — a short vector of colliding pairs, or a red-black tree once the
//! chain crosses [`PROMOTE_THRESHOLD`]. Deletions that shrink a tree
//! below [`DEMOTE_THRESHOLD`] convert it back to a list. Promotion and
//! demotion are invisible through the [`Backend`] surface: lookups,
//! inserts, and deletes behave identically in either representation.
//!
//! Bucket selection uses [`shard_hash`], the same byte-mixing hash the
//! cluster layer uses for shard routing. The table grows (doubling, full
//! rehash) when the mean chain length exceeds the configured load factor.
//! The engine's write lock quiesces readers for the duration of a resize.
//!
//! In the original pointer-based design the tree adapter carried a
//! back-pointer to its owning hash node; here the cycle dissolves into
//! ownership — the bucket owns the tree, the tree owns its nodes, and the
//! nodes own the key/value bytes.

use tracing::debug;

use crate::backend::rbtree::RbTree;
use crate::backend::{Backend, BackendError};
use crate::types::{KeyRange, KvPair, shard_hash};

/// Default bucket count when the engine config leaves it unset.
pub const DEFAULT_INITIAL_BUCKETS: usize = 16;

/// Default mean-chain-length bound before the table doubles.
pub const DEFAULT_LOAD_FACTOR: f64 = 8.0;

/// Chain length beyond which a list bucket is rebuilt as a tree.
pub const PROMOTE_THRESHOLD: usize = 8;

/// Tree size below which a tree bucket reverts to a list.
pub const DEMOTE_THRESHOLD: usize = 6;

/// One hash slot: a short collision list, or a red-black tree once the
/// chain outgrows [`PROMOTE_THRESHOLD`].
#[derive(Debug)]
enum Bucket {
    List(Vec<KvPair>),
    Tree(RbTree),
}

/// Chained hash table with list buckets that promote to red-black trees.
#[derive(Debug)]
pub struct HashBackend {
    buckets: Vec<Bucket>,
    len: usize,
    data_bytes: usize,
    load_factor: f64,
}

impl HashBackend {
    /// Creates a table with `initial_buckets` slots rounded up to a power
    /// of two (0 selects the default) and the given load factor (values
    /// `<= 0.0` select the default).
    pub fn new(initial_buckets: usize, load_factor: f64) -> Self {
        let requested = if initial_buckets == 0 {
            DEFAULT_INITIAL_BUCKETS
        } else {
            initial_buckets
        };
        let bucket_count = requested.next_power_of_two();
        let load_factor = if load_factor > 0.0 {
            load_factor
        } else {
            DEFAULT_LOAD_FACTOR
        };

        let mut buckets = Vec::new();
        buckets.resize_with(bucket_count, || Bucket::List(Vec::new()));
        Self {
            buckets,
            len: 0,
            data_bytes: 0,
            load_factor,
        }
    }

    /// Number of buckets currently promoted to tree form.
    pub fn tree_buckets(&self) -> usize {
        self.buckets
            .iter()
            .filter(|bucket| matches!(bucket, Bucket::Tree(_)))
            .count()
    }

    /// Current bucket count.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    fn bucket_of(&self, key: &[u8]) -> usize {
        (shard_hash(key) as usize) & (self.buckets.len() - 1)
    }

    /// Inserts into the addressed bucket, promoting an over-long list.
    /// Returns whether the key is new to the table.
    fn insert_into_bucket(&mut self, key: &[u8], value: &[u8]) -> bool {
        let idx = self.bucket_of(key);
        match &mut self.buckets[idx] {
            Bucket::List(items) => {
                if let Some(pair) = items.iter_mut().find(|pair| pair.key == key) {
                    self.data_bytes = self.data_bytes - pair.value.len() + value.len();
                    pair.value = value.to_vec();
                    return false;
                }
                items.push(KvPair::new(key, value));
                self.data_bytes += key.len() + value.len();
                if items.len() > PROMOTE_THRESHOLD {
                    let mut tree = RbTree::new();
                    for pair in items.drain(..) {
                        tree.insert(&pair.key, &pair.value);
                    }
                    debug!(bucket = idx, entries = tree.len(), "bucket promoted to tree");
                    self.buckets[idx] = Bucket::Tree(tree);
                }
                true
            }
            Bucket::Tree(tree) => match tree.insert(key, value) {
                Some(old) => {
                    self.data_bytes = self.data_bytes - old.len() + value.len();
                    false
                }
                None => {
                    self.data_bytes += key.len() + value.len();
                    true
                }
            },
        }
    }

    /// Doubles the bucket array and redistributes every entry. Buckets
    /// start over as lists and re-promote on their own merits.
    fn resize(&mut self) {
        let new_count = self.buckets.len() * 2;
        debug!(
            from = self.buckets.len(),
            to = new_count,
            entries = self.len,
            "hash table resize"
        );

        let old = std::mem::take(&mut self.buckets);
        self.buckets.resize_with(new_count, || Bucket::List(Vec::new()));

        let saved_bytes = self.data_bytes;
        for bucket in old {
            match bucket {
                Bucket::List(items) => {
                    for pair in items {
                        self.insert_into_bucket(&pair.key, &pair.value);
                    }
                }
                Bucket::Tree(tree) => {
                    for pair in tree.pairs() {
                        self.insert_into_bucket(&pair.key, &pair.value);
                    }
                }
            }
        }
        // Redistribution moves entries without changing payload.
        self.data_bytes = saved_bytes;
    }

    fn should_resize(&self) -> bool {
        (self.len + 1) as f64 > self.load_factor * self.buckets.len() as f64
    }
}

impl Backend for HashBackend {
    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), BackendError> {
        if self.should_resize() {
            self.resize();
        }
        if self.insert_into_bucket(key, value) {
            self.len += 1;
        }
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        match &self.buckets[self.bucket_of(key)] {
            Bucket::List(items) => items
                .iter()
                .find(|pair| pair.key == key)
                .map(|pair| pair.value.clone()),
            Bucket::Tree(tree) => tree.get(key).map(<[u8]>::to_vec),
        }
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), BackendError> {
        let idx = self.bucket_of(key);
        match &mut self.buckets[idx] {
            Bucket::List(items) => {
                let pos = items
                    .iter()
                    .position(|pair| pair.key == key)
                    .ok_or(BackendError::NotFound)?;
                let pair = items.remove(pos);
                self.data_bytes -= pair.payload_len();
            }
            Bucket::Tree(tree) => {
                let old = tree.remove(key).ok_or(BackendError::NotFound)?;
                self.data_bytes -= key.len() + old.len();
                if tree.len() < DEMOTE_THRESHOLD {
                    let items = tree.pairs();
                    debug!(bucket = idx, entries = items.len(), "bucket demoted to list");
                    self.buckets[idx] = Bucket::List(items);
                }
            }
        }
        self.len -= 1;
        Ok(())
    }

    fn update(&mut self, key: &[u8], value: &[u8]) -> Result<(), BackendError> {
        let idx = self.bucket_of(key);
        match &mut self.buckets[idx] {
            Bucket::List(items) => {
                let pair = items
                    .iter_mut()
                    .find(|pair| pair.key == key)
                    .ok_or(BackendError::NotFound)?;
                self.data_bytes = self.data_bytes - pair.value.len() + value.len();
                pair.value = value.to_vec();
            }
            Bucket::Tree(tree) => {
                if tree.get(key).is_none() {
                    return Err(BackendError::NotFound);
                }
                let old = tree.insert(key, value).unwrap_or_default();
                self.data_bytes = self.data_bytes - old.len() + value.len();
            }
        }
        Ok(())
    }

    fn count(&self) -> usize {
        self.len
    }

    fn size_bytes(&self) -> usize {
        self.data_bytes
    }

    fn memory_usage(&self) -> usize {
        let structural: usize = self
            .buckets
            .iter()
            .map(|bucket| match bucket {
                Bucket::List(items) => items.capacity() * std::mem::size_of::<KvPair>(),
                Bucket::Tree(tree) => tree.memory_usage() - tree.data_bytes(),
            })
            .sum();
        self.data_bytes + structural + self.buckets.capacity() * std::mem::size_of::<Bucket>()
    }

    fn is_ordered(&self) -> bool {
        false
    }

    fn entries(&self) -> Vec<KvPair> {
        let mut out = Vec::with_capacity(self.len);
        for bucket in &self.buckets {
            match bucket {
                Bucket::List(items) => out.extend(items.iter().cloned()),
                Bucket::Tree(tree) => out.extend(tree.pairs()),
            }
        }
        out
    }

    fn range_scan(&self, range: &KeyRange) -> Vec<KvPair> {
        let limit = range.limit.unwrap_or(usize::MAX);
        let mut out = Vec::new();
        'buckets: for bucket in &self.buckets {
            match bucket {
                Bucket::List(items) => {
                    for pair in items {
                        if range.contains(&pair.key) {
                            out.push(pair.clone());
                            if out.len() >= limit {
                                break 'buckets;
                            }
                        }
                    }
                }
                Bucket::Tree(tree) => {
                    tree.scan(&mut |k, v| {
                        if range.contains(k) {
                            out.push(KvPair::new(k, v));
                        }
                        out.len() < limit
                    });
                    if out.len() >= limit {
                        break 'buckets;
                    }
                }
            }
        }
        out
    }

    fn prefix_scan(&self, prefix: &[u8], limit: Option<usize>) -> Vec<KvPair> {
        let limit = limit.unwrap_or(usize::MAX);
        let mut out = Vec::new();
        'buckets: for bucket in &self.buckets {
            match bucket {
                Bucket::List(items) => {
                    for pair in items {
                        if pair.key.starts_with(prefix) {
                            out.push(pair.clone());
                            if out.len() >= limit {
                                break 'buckets;
                            }
                        }
                    }
                }
                Bucket::Tree(tree) => {
                    tree.scan(&mut |k, v| {
                        if k.starts_with(prefix) {
                            out.push(KvPair::new(k, v));
                        }
                        out.len() < limit
                    });
                    if out.len() >= limit {
                        break 'buckets;
                    }
                }
            }
        }
        out
    }

    fn clear(&mut self) {
        for bucket in &mut self.buckets {
            *bucket = Bucket::List(Vec::new());
        }
        self.len = 0;
        self.data_bytes = 0;
    }
}
